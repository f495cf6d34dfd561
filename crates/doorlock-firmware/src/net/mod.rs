mod server;
mod transport;
mod wifi;

pub use server::UnlockListener;
pub use transport::NetTransport;
pub use wifi::{start, wait_for_network};

//! Physical lock actuators
//!
//! The gate only ever asks for one of two positions. Relay strikes and hobby
//! servos are both driven through `embedded-hal` traits so the same code runs
//! against ESP32 GPIO/LEDC peripherals and host test doubles.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use thiserror_no_std::Error;

/// Servo frame period at 50 Hz
pub const SERVO_PERIOD_US: u32 = 20_000;
/// Pulse width for 0°
pub const SERVO_MIN_PULSE_US: u32 = 500;
/// Pulse width for 180°
pub const SERVO_MAX_PULSE_US: u32 = 2_500;
/// Largest commandable servo angle
pub const SERVO_MAX_ANGLE: u8 = 180;

/// Position the lock mechanism is driven to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPosition {
    Locked,
    Unlocked,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("Actuator pin write failed")]
    Pin,
    #[error("Actuator PWM duty update failed")]
    Pwm,
    #[error("Servo angle {0} is out of range")]
    InvalidAngle(u8),
}

/// Anything that can move the lock between its two positions.
pub trait Actuator {
    fn set_position(&mut self, position: LockPosition) -> Result<(), ActuatorError>;
}

impl<A: Actuator + ?Sized> Actuator for &mut A {
    fn set_position(&mut self, position: LockPosition) -> Result<(), ActuatorError> {
        (**self).set_position(position)
    }
}

/// Logic level that energizes the relay coil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveLevel {
    High,
    Low,
}

/// Relay-driven strike.
///
/// The coil is energized to unlock, so a de-energized relay (power loss,
/// reset, floating pin) leaves the door locked.
pub struct RelayActuator<P> {
    pin: P,
    active: ActiveLevel,
}

impl<P: OutputPin> RelayActuator<P> {
    pub fn new(pin: P, active: ActiveLevel) -> Self {
        Self { pin, active }
    }

    /// Give the pin back, e.g. to reconfigure it after a fault
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> Actuator for RelayActuator<P> {
    fn set_position(&mut self, position: LockPosition) -> Result<(), ActuatorError> {
        let energize = position == LockPosition::Unlocked;
        let drive_high = match self.active {
            ActiveLevel::High => energize,
            ActiveLevel::Low => !energize,
        };

        let result = if drive_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        result.map_err(|_| ActuatorError::Pin)
    }
}

/// Hobby servo driving a latch or a deadbolt thumb-turn.
///
/// The PWM channel must already be configured for a 50 Hz frame. Angles are
/// mapped linearly onto the 500-2500 µs pulse range.
pub struct ServoActuator<P> {
    pwm: P,
    locked_angle: u8,
    unlocked_angle: u8,
}

impl<P: SetDutyCycle> ServoActuator<P> {
    pub fn new(pwm: P, locked_angle: u8, unlocked_angle: u8) -> Result<Self, ActuatorError> {
        for angle in [locked_angle, unlocked_angle] {
            if angle > SERVO_MAX_ANGLE {
                return Err(ActuatorError::InvalidAngle(angle));
            }
        }

        Ok(Self {
            pwm,
            locked_angle,
            unlocked_angle,
        })
    }

    /// Pulse width in microseconds for an angle in degrees
    pub const fn pulse_width_us(angle: u8) -> u32 {
        SERVO_MIN_PULSE_US
            + (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) * angle as u32 / SERVO_MAX_ANGLE as u32
    }

    fn duty_for(&self, angle: u8) -> u16 {
        let max = self.pwm.max_duty_cycle() as u32;
        (Self::pulse_width_us(angle) * max / SERVO_PERIOD_US) as u16
    }
}

impl<P: SetDutyCycle> Actuator for ServoActuator<P> {
    fn set_position(&mut self, position: LockPosition) -> Result<(), ActuatorError> {
        let angle = match position {
            LockPosition::Locked => self.locked_angle,
            LockPosition::Unlocked => self.unlocked_angle,
        };
        let duty = self.duty_for(angle);

        self.pwm
            .set_duty_cycle(duty)
            .map_err(|_| ActuatorError::Pwm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePin, FakePwm};

    #[test]
    fn relay_active_high_energizes_to_unlock() {
        let mut relay = RelayActuator::new(FakePin::default(), ActiveLevel::High);

        relay.set_position(LockPosition::Unlocked).unwrap();
        relay.set_position(LockPosition::Locked).unwrap();

        assert_eq!(relay.release().levels, [true, false]);
    }

    #[test]
    fn relay_active_low_drives_pin_low_to_unlock() {
        let mut relay = RelayActuator::new(FakePin::default(), ActiveLevel::Low);

        relay.set_position(LockPosition::Unlocked).unwrap();
        relay.set_position(LockPosition::Locked).unwrap();

        assert_eq!(relay.release().levels, [false, true]);
    }

    #[test]
    fn relay_pin_failure_is_reported() {
        let mut relay = RelayActuator::new(FakePin::failing(), ActiveLevel::High);

        assert_eq!(
            relay.set_position(LockPosition::Unlocked),
            Err(ActuatorError::Pin)
        );
    }

    #[test]
    fn servo_pulse_width_spans_full_range() {
        assert_eq!(ServoActuator::<FakePwm>::pulse_width_us(0), 500);
        assert_eq!(ServoActuator::<FakePwm>::pulse_width_us(90), 1500);
        assert_eq!(ServoActuator::<FakePwm>::pulse_width_us(180), 2500);
    }

    #[test]
    fn servo_maps_positions_to_duty() {
        let mut servo = ServoActuator::new(FakePwm::new(1000), 0, 90).unwrap();

        servo.set_position(LockPosition::Unlocked).unwrap();
        servo.set_position(LockPosition::Locked).unwrap();

        // 1500 µs and 500 µs of a 20 ms frame at 1000 steps
        assert_eq!(servo.pwm.duties, [75, 25]);
    }

    #[test]
    fn servo_rejects_out_of_range_angle() {
        assert!(matches!(
            ServoActuator::new(FakePwm::new(1000), 0, 200),
            Err(ActuatorError::InvalidAngle(200))
        ));
    }
}

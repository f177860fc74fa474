use handmade_core::ControllerInput;
use winit::keyboard::KeyCode;

#[cfg(feature = "gamepad")]
use gilrs::{Axis, Gilrs};

/// Stick travel ignored around the center.
pub const STICK_DEADZONE: f32 = 0.1;

/// Keyboard directions currently held; arrows and WASD both count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Directions {
    left: bool,
    right: bool,
    up: bool,
    down: bool,
}

impl Directions {
    fn set(&mut self, key: KeyCode, pressed: bool) -> bool {
        let slot = match key {
            KeyCode::ArrowLeft | KeyCode::KeyA => &mut self.left,
            KeyCode::ArrowRight | KeyCode::KeyD => &mut self.right,
            KeyCode::ArrowUp | KeyCode::KeyW => &mut self.up,
            KeyCode::ArrowDown | KeyCode::KeyS => &mut self.down,
            _ => return false,
        };
        *slot = pressed;
        true
    }

    fn any(&self) -> bool {
        self.left || self.right || self.up || self.down
    }

    fn stick(&self) -> (f32, f32) {
        let axis = |neg: bool, pos: bool| f32::from(u8::from(pos)) - f32::from(u8::from(neg));
        (axis(self.left, self.right), axis(self.down, self.up))
    }
}

/// Merges the keyboard and the first connected gamepad into one controller.
pub struct InputState {
    keys: Directions,
    #[cfg(feature = "gamepad")]
    gilrs: Option<Gilrs>,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            keys: Directions::default(),
            #[cfg(feature = "gamepad")]
            gilrs: match Gilrs::new() {
                Ok(gilrs) => Some(gilrs),
                Err(e) => {
                    tracing::warn!("gamepad support unavailable: {e}");
                    None
                }
            },
        }
    }

    /// Keyboard only, without touching gamepad devices.
    #[cfg(test)]
    pub fn keyboard_only() -> Self {
        Self {
            keys: Directions::default(),
            #[cfg(feature = "gamepad")]
            gilrs: None,
        }
    }

    /// Track a key press or release. Returns whether the key is a direction.
    pub fn handle_key(&mut self, key: KeyCode, pressed: bool) -> bool {
        self.keys.set(key, pressed)
    }

    /// Keys are released when the window loses focus, otherwise a key held
    /// during alt-tab sticks.
    pub fn release_all(&mut self) {
        self.keys = Directions::default();
    }

    /// Sample this frame's controller state.
    pub fn poll(&mut self) -> ControllerInput {
        let keyboard = self.keys.any().then(|| self.keys.stick());
        merge(keyboard, self.poll_gamepad())
    }

    #[cfg(feature = "gamepad")]
    fn poll_gamepad(&mut self) -> Option<(f32, f32)> {
        let gilrs = self.gilrs.as_mut()?;
        while let Some(event) = gilrs.next_event() {
            match event.event {
                gilrs::EventType::Connected => tracing::info!("gamepad {} connected", event.id),
                gilrs::EventType::Disconnected => {
                    tracing::info!("gamepad {} disconnected", event.id)
                }
                _ => {}
            }
        }

        let (_, gamepad) = gilrs.gamepads().next()?;
        Some((
            apply_deadzone(gamepad.value(Axis::LeftStickX), STICK_DEADZONE),
            apply_deadzone(gamepad.value(Axis::LeftStickY), STICK_DEADZONE),
        ))
    }

    #[cfg(not(feature = "gamepad"))]
    fn poll_gamepad(&mut self) -> Option<(f32, f32)> {
        None
    }
}

/// Zero inside the deadzone, then rescaled so full travel still reads 1.
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        return 0.0;
    }
    let magnitude = (value.abs() - deadzone) / (1.0 - deadzone);
    magnitude.min(1.0).copysign(value)
}

/// Sum both sources. With neither present the controller is disconnected.
fn merge(keyboard: Option<(f32, f32)>, gamepad: Option<(f32, f32)>) -> ControllerInput {
    if keyboard.is_none() && gamepad.is_none() {
        return ControllerInput::default();
    }
    let (kx, ky) = keyboard.unwrap_or_default();
    let (gx, gy) = gamepad.unwrap_or_default();
    ControllerInput {
        connected: true,
        stick_x: (kx + gx).clamp(-1.0, 1.0),
        stick_y: (ky + gy).clamp(-1.0, 1.0),
    }
}

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use evdev::{Device, EventType, FFEffectData, FFEffectKind, FFReplay, FFTrigger};
use tracing::*;

use crate::error::{TrexError, TrexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerEvent {
    LeftPressed,
    RightPressed,
    UpPressed,
    DownPressed,
    TrianglePressed,
    CrossPressed,
    SquarePressed,
    CirclePressed,
    NoEvent,
    MenuPressed,
    R2Pressed,
    L2Pressed,
    Released,
    PsHome,
    PsShare,
}

/// Single-slot mailbox between the input reader thread and the foreground
/// action loop. One writer, one reader, popped on read.
#[derive(Clone, Default)]
pub struct EventSlot {
    slot: Arc<Mutex<Option<ControllerEvent>>>,
}

impl EventSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ControllerEvent) {
        self.slot.lock().unwrap().replace(event);
    }

    pub fn pop(&self) -> Option<ControllerEvent> {
        self.slot.lock().unwrap().take()
    }
}

/// Gamepad capability consumed by the action dispatcher.
pub trait InputSource: Send {
    fn event_slot(&self) -> EventSlot;
    /// Spawns the background thread that blocks in the device read loop and
    /// fills the event slot.
    fn start_reader(&mut self) -> TrexResult<()>;
    fn rumble(&mut self);
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
}

const DEVICE_PATH: &str = "/dev/input/event2";
const CONNECT_RETRIES: u32 = 30;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Translates one raw evdev `(code, value)` pair with the PS4 bluetooth
/// profile. The D-pad reports on absolute axes 16/17, buttons on key codes
/// 304..=316; value 0 is always a release.
fn ps4_profile(code: u16, value: i32) -> ControllerEvent {
    match (code, value) {
        (17, -1) => ControllerEvent::UpPressed,
        (16, 1) => ControllerEvent::RightPressed,
        (17, 1) => ControllerEvent::DownPressed,
        (16, -1) => ControllerEvent::LeftPressed,
        (16 | 17, 0) => ControllerEvent::Released,
        (304, 1) => ControllerEvent::CrossPressed,
        (305, 1) => ControllerEvent::CirclePressed,
        (307, 1) => ControllerEvent::TrianglePressed,
        (308, 1) => ControllerEvent::SquarePressed,
        (312, 1) => ControllerEvent::L2Pressed,
        (313, 1) => ControllerEvent::R2Pressed,
        (314, 1) => ControllerEvent::PsShare,
        (315, 1) => ControllerEvent::MenuPressed,
        (316, 1) => ControllerEvent::PsHome,
        (304 | 305 | 307 | 308 | 312 | 313 | 314 | 315 | 316, 0) => ControllerEvent::Released,
        _ => ControllerEvent::NoEvent,
    }
}

pub struct EvdevGameController {
    device: Option<Device>,
    slot: EventSlot,
    connected: Arc<AtomicBool>,
    reader: Option<thread::JoinHandle<()>>,
}

impl EvdevGameController {
    /// Connects to the first controller, retrying while the bluetooth link
    /// comes up.
    pub fn connect() -> TrexResult<Self> {
        let mut retries = 0;
        let device = loop {
            let attempt = Device::open(Path::new(DEVICE_PATH))
                .and_then(|mut device| device.grab().map(|()| device));
            match attempt {
                Ok(device) => {
                    info!("Connected PS4 controller successfully!");
                    info!("Use 'Options' to gracefully shutdown the robot!");
                    break device;
                }
                Err(error) => {
                    retries += 1;
                    if retries >= CONNECT_RETRIES {
                        return Err(TrexError::NoInputConnected(CONNECT_RETRIES));
                    }
                    info!(
                        "Connecting attempt[{retries}] to device failed ({error})... retrying in 5 sec!"
                    );
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };
        Ok(EvdevGameController {
            device: Some(device),
            slot: EventSlot::new(),
            connected: Arc::new(AtomicBool::new(true)),
            reader: None,
        })
    }
}

impl InputSource for EvdevGameController {
    fn event_slot(&self) -> EventSlot {
        self.slot.clone()
    }

    fn start_reader(&mut self) -> TrexResult<()> {
        let mut device = self
            .device
            .take()
            .ok_or(TrexError::InputDisconnected)?;
        let slot = self.slot.clone();
        let connected = Arc::clone(&self.connected);

        let handle = thread::Builder::new()
            .name("gamepad-reader".to_owned())
            .spawn(move || {
                while connected.load(Ordering::SeqCst) {
                    let events = match device.fetch_events() {
                        Ok(events) => events.collect::<Vec<_>>(),
                        Err(error) => {
                            error!("Game controller disconnected: {error}");
                            connected.store(false, Ordering::SeqCst);
                            return;
                        }
                    };
                    for event in events {
                        if event.event_type() != EventType::KEY
                            && event.event_type() != EventType::ABSOLUTE
                        {
                            continue;
                        }
                        let profile_event = ps4_profile(event.code(), event.value());
                        if profile_event == ControllerEvent::NoEvent {
                            continue;
                        }
                        debug!("GC::Last event: {profile_event:?}");
                        slot.push(profile_event);
                        if profile_event == ControllerEvent::MenuPressed {
                            let _ = device.ungrab();
                            connected.store(false, Ordering::SeqCst);
                            info!("Joystick disconnected");
                            return;
                        }
                    }
                }
            })?;
        self.reader = Some(handle);
        Ok(())
    }

    fn rumble(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let effect = FFEffectData {
            direction: 0,
            trigger: FFTrigger {
                button: 0,
                interval: 0,
            },
            replay: FFReplay {
                length: 1000,
                delay: 0,
            },
            kind: FFEffectKind::Rumble {
                strong_magnitude: 0x0000,
                weak_magnitude: 0xffff,
            },
        };
        match device.upload_ff_effect(effect) {
            Ok(mut uploaded) => {
                if let Err(error) = uploaded.play(1) {
                    warn!("Failed to play rumble effect: {error}");
                }
                thread::sleep(Duration::from_secs(1));
            }
            Err(error) => warn!("Failed to upload rumble effect: {error}"),
        }
    }

    fn disconnect(&mut self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut device) = self.device.take() {
            let _ = device.ungrab();
        }
        info!("Joystick disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpad_translation() {
        assert_eq!(ps4_profile(17, -1), ControllerEvent::UpPressed);
        assert_eq!(ps4_profile(17, 1), ControllerEvent::DownPressed);
        assert_eq!(ps4_profile(16, 1), ControllerEvent::RightPressed);
        assert_eq!(ps4_profile(16, -1), ControllerEvent::LeftPressed);
        assert_eq!(ps4_profile(16, 0), ControllerEvent::Released);
        assert_eq!(ps4_profile(17, 0), ControllerEvent::Released);
    }

    #[test]
    fn button_translation() {
        assert_eq!(ps4_profile(304, 1), ControllerEvent::CrossPressed);
        assert_eq!(ps4_profile(305, 1), ControllerEvent::CirclePressed);
        assert_eq!(ps4_profile(307, 1), ControllerEvent::TrianglePressed);
        assert_eq!(ps4_profile(308, 1), ControllerEvent::SquarePressed);
        assert_eq!(ps4_profile(312, 1), ControllerEvent::L2Pressed);
        assert_eq!(ps4_profile(313, 1), ControllerEvent::R2Pressed);
        assert_eq!(ps4_profile(314, 1), ControllerEvent::PsShare);
        assert_eq!(ps4_profile(315, 1), ControllerEvent::MenuPressed);
        assert_eq!(ps4_profile(316, 1), ControllerEvent::PsHome);
        assert_eq!(ps4_profile(304, 0), ControllerEvent::Released);
        assert_eq!(ps4_profile(315, 0), ControllerEvent::Released);
    }

    #[test]
    fn unknown_codes_are_no_events() {
        assert_eq!(ps4_profile(6, 1), ControllerEvent::NoEvent);
        assert_eq!(ps4_profile(999, 1), ControllerEvent::NoEvent);
    }

    #[test]
    fn event_slot_pops_on_read() {
        let slot = EventSlot::new();
        assert_eq!(slot.pop(), None);
        slot.push(ControllerEvent::CrossPressed);
        slot.push(ControllerEvent::UpPressed);
        assert_eq!(slot.pop(), Some(ControllerEvent::UpPressed));
        assert_eq!(slot.pop(), None);
    }
}

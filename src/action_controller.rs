use std::collections::HashMap;

use tracing::*;

use crate::error::TrexResult;
use crate::gamepad::{ControllerEvent, EventSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    Sit,
    Stand,
    Wave,
    Dance,
    Shutdown,
    Mode1,
    Mode2,
    SpeedUp,
    SpeedDown,
    Released,
    Report,
    Calibrate,
}

pub type ActionHandler<C> = fn(&mut C) -> TrexResult<()>;

/// Single-slot action dispatcher, sized for one human pressing one button
/// at a time.
///
/// Handlers are plain function pointers over the owning context `C`; the
/// context drives dispatch in two steps (`poll` then `try_begin`) and calls
/// the returned handler itself, because the handler needs mutable access to
/// the very object this controller lives in.
pub struct ActionController<C> {
    actions: HashMap<Action, ActionHandler<C>>,
    action_events: HashMap<ControllerEvent, Action>,
    current_action: Option<Action>,
    last_action: Option<Action>,
    proposed_action: Option<Action>,
    last_event: Option<ControllerEvent>,
    released: bool,
    is_busy: bool,
    repeat_action: bool,
    event_source: Option<EventSlot>,
}

impl<C> Default for ActionController<C> {
    fn default() -> Self {
        ActionController {
            actions: HashMap::new(),
            action_events: HashMap::new(),
            current_action: None,
            last_action: None,
            proposed_action: None,
            last_event: None,
            released: true,
            is_busy: false,
            repeat_action: false,
            event_source: None,
        }
    }
}

impl<C> ActionController<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the mailbox the input thread fills.
    pub fn attach_event_source(&mut self, slot: EventSlot) {
        self.event_source = Some(slot);
    }

    /// Binds an action to its handler and to the controller event that
    /// proposes it.
    pub fn register(&mut self, action: Action, handler: ActionHandler<C>, event: ControllerEvent) {
        self.actions.insert(action, handler);
        self.action_events.insert(event, action);
    }

    fn process_event(&mut self, event: ControllerEvent) -> Option<Action> {
        match event {
            // the input layer never enqueues NO_EVENT; defensive no-op
            ControllerEvent::NoEvent => None,
            ControllerEvent::Released => {
                self.released = true;
                self.last_action = None;
                self.action_events.get(&event).copied()
            }
            _ => {
                self.released = false;
                self.action_events.get(&event).copied()
            }
        }
    }

    /// Picks the next action to run: a freshly arrived event wins, an armed
    /// repeat re-proposes the last action, otherwise nothing.
    pub fn poll(&mut self) -> Option<Action> {
        self.proposed_action = None;
        self.last_event = self.event_source.as_ref().and_then(|slot| slot.pop());

        if let Some(event) = self.last_event {
            self.proposed_action = self.process_event(event);
        } else if self.repeat_action {
            self.proposed_action = self.last_action;
        }
        self.proposed_action
    }

    /// Claims the action slot and hands back the handler to invoke, unless
    /// an action is already running or the action was never registered.
    pub fn try_begin(&mut self, action: Action) -> Option<ActionHandler<C>> {
        if self.is_busy {
            return None;
        }
        let handler = self.actions.get(&action).copied()?;
        self.current_action = Some(action);
        self.is_busy = true;
        debug!("Action started: {action:?}");
        Some(handler)
    }

    /// Ends the running action, optionally arming it to repeat while the
    /// button stays held.
    pub fn end_action(&mut self, repeat: bool) {
        self.last_action = self.current_action;
        self.is_busy = false;
        debug!("Action ended: {:?}", self.current_action);
        self.current_action = None;
        self.repeat_action = repeat;
    }

    /// Whether the running action is the same one that ran last.
    pub fn is_repeating(&self) -> bool {
        self.current_action == self.last_action
    }

    pub fn is_busy(&self) -> bool {
        self.is_busy
    }

    pub fn repeat_action(&self) -> bool {
        self.repeat_action
    }

    /// Whether the last processed event was a button release.
    pub fn released(&self) -> bool {
        self.released
    }

    pub fn current_action(&self) -> Option<Action> {
        self.current_action
    }

    pub fn last_action(&self) -> Option<Action> {
        self.last_action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal context standing in for the quadruped facade.
    struct Rig {
        controller: ActionController<Rig>,
        slot: EventSlot,
        sit_runs: usize,
        forward_runs: usize,
        report_runs: usize,
        releases: usize,
    }

    impl Rig {
        fn new() -> Self {
            let slot = EventSlot::new();
            let mut controller = ActionController::new();
            controller.attach_event_source(slot.clone());
            controller.register(Action::Sit, Rig::sit, ControllerEvent::CrossPressed);
            controller.register(Action::Forward, Rig::forward, ControllerEvent::UpPressed);
            controller.register(Action::Report, Rig::report, ControllerEvent::PsHome);
            controller.register(Action::Released, Rig::reset, ControllerEvent::Released);
            Rig {
                controller,
                slot,
                sit_runs: 0,
                forward_runs: 0,
                report_runs: 0,
                releases: 0,
            }
        }

        fn run_once(&mut self) -> TrexResult<()> {
            if let Some(action) = self.controller.poll() {
                if let Some(handler) = self.controller.try_begin(action) {
                    handler(self)?;
                }
            }
            Ok(())
        }

        fn sit(&mut self) -> TrexResult<()> {
            self.sit_runs += 1;
            self.controller.end_action(false);
            Ok(())
        }

        fn forward(&mut self) -> TrexResult<()> {
            self.forward_runs += 1;
            self.controller.end_action(true);
            Ok(())
        }

        // deliberately never ends its action
        fn report(&mut self) -> TrexResult<()> {
            self.report_runs += 1;
            Ok(())
        }

        fn reset(&mut self) -> TrexResult<()> {
            self.releases += 1;
            self.controller.end_action(false);
            Ok(())
        }
    }

    #[test]
    fn one_shot_runs_exactly_once() {
        let mut rig = Rig::new();
        rig.slot.push(ControllerEvent::CrossPressed);
        rig.run_once().unwrap();
        assert_eq!(rig.sit_runs, 1);
        assert!(!rig.controller.is_busy());
        assert!(!rig.controller.repeat_action());

        rig.run_once().unwrap();
        rig.run_once().unwrap();
        assert_eq!(rig.sit_runs, 1);
    }

    #[test]
    fn repeating_action_reruns_without_new_events() {
        let mut rig = Rig::new();
        rig.slot.push(ControllerEvent::UpPressed);
        rig.run_once().unwrap();
        assert_eq!(rig.forward_runs, 1);
        assert!(rig.controller.repeat_action());

        rig.run_once().unwrap();
        rig.run_once().unwrap();
        assert_eq!(rig.forward_runs, 3);
    }

    #[test]
    fn release_breaks_the_repeat_chain() {
        let mut rig = Rig::new();
        rig.slot.push(ControllerEvent::UpPressed);
        rig.run_once().unwrap();
        rig.run_once().unwrap();
        assert_eq!(rig.forward_runs, 2);

        rig.slot.push(ControllerEvent::Released);
        rig.run_once().unwrap();
        assert_eq!(rig.releases, 1);

        rig.run_once().unwrap();
        assert_eq!(rig.forward_runs, 2);
    }

    #[test]
    fn busy_slot_drops_proposals() {
        let mut rig = Rig::new();
        rig.slot.push(ControllerEvent::PsHome);
        rig.run_once().unwrap();
        assert_eq!(rig.report_runs, 1);
        assert!(rig.controller.is_busy());

        rig.slot.push(ControllerEvent::CrossPressed);
        rig.run_once().unwrap();
        assert_eq!(rig.sit_runs, 0);
    }

    #[test]
    fn is_repeating_compares_current_and_last() {
        let mut controller: ActionController<Rig> = ActionController::new();
        controller.register(Action::Forward, Rig::forward, ControllerEvent::UpPressed);

        // both empty counts as repeating, matching the original dispatcher
        assert!(controller.is_repeating());

        controller.try_begin(Action::Forward).unwrap();
        assert!(!controller.is_repeating());
        controller.end_action(true);
        controller.try_begin(Action::Forward).unwrap();
        assert!(controller.is_repeating());
    }

    #[test]
    fn end_action_is_idempotent() {
        let mut controller: ActionController<Rig> = ActionController::new();
        controller.register(Action::Sit, Rig::sit, ControllerEvent::CrossPressed);
        controller.try_begin(Action::Sit).unwrap();
        controller.end_action(false);
        controller.end_action(false);
        assert!(!controller.is_busy());
        assert!(!controller.repeat_action());
        assert_eq!(controller.last_action(), None);
    }

    #[test]
    fn released_flag_tracks_the_last_event() {
        let mut controller: ActionController<Rig> = ActionController::new();
        controller.register(Action::Forward, Rig::forward, ControllerEvent::UpPressed);
        controller.register(Action::Released, Rig::reset, ControllerEvent::Released);
        assert!(controller.released());
        controller.process_event(ControllerEvent::UpPressed);
        assert!(!controller.released());
        controller.process_event(ControllerEvent::Released);
        assert!(controller.released());
    }

    #[test]
    fn no_event_is_a_defensive_no_op() {
        let mut controller: ActionController<Rig> = ActionController::new();
        controller.register(Action::Sit, Rig::sit, ControllerEvent::CrossPressed);
        assert_eq!(controller.process_event(ControllerEvent::NoEvent), None);
    }

    #[test]
    fn release_clears_last_action_before_dispatch() {
        let mut controller: ActionController<Rig> = ActionController::new();
        controller.register(Action::Released, Rig::reset, ControllerEvent::Released);
        controller.register(Action::Forward, Rig::forward, ControllerEvent::UpPressed);
        controller.try_begin(Action::Forward).unwrap();
        controller.end_action(true);
        assert_eq!(controller.last_action(), Some(Action::Forward));

        let proposed = controller.process_event(ControllerEvent::Released);
        assert_eq!(proposed, Some(Action::Released));
        assert_eq!(controller.last_action(), None);
    }

    #[test]
    fn unregistered_events_propose_nothing() {
        let mut controller: ActionController<Rig> = ActionController::new();
        assert_eq!(controller.process_event(ControllerEvent::CirclePressed), None);
    }
}

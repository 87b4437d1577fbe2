//! Observer-side reconstruction of per-slot agent state.
//!
//! The gateway gives no ordering, replay, or exactly-once guarantee, so
//! every transition here is written as if the incoming event could be the
//! first one ever seen for its slot, or a replay of one already processed.
//! `agent_created` is a full slot reset; the other events synthesize the
//! slot forward when earlier events never arrived.

use crate::event::{LifecycleEvent, MAX_SLOT, MIN_SLOT};

/// Lifecycle state of one tracked agent slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SlotState {
    #[default]
    Absent,
    Thinking {
        task_name: String,
    },
    Working {
        task_name: String,
    },
    Testing {
        task_name: String,
        preview_link: String,
        validation_link: String,
    },
}

impl SlotState {
    fn task_name(&self) -> &str {
        match self {
            Self::Absent => "",
            Self::Thinking { task_name }
            | Self::Working { task_name }
            | Self::Testing { task_name, .. } => task_name,
        }
    }
}

const SLOT_COUNT: usize = MAX_SLOT as usize;

/// Fixed arena of agent slots, indexed by the 1..=9 wire identifier.
#[derive(Debug, Default)]
pub struct AgentSlots {
    slots: [SlotState; SLOT_COUNT],
}

impl AgentSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a slot; out-of-range ids read as `Absent`.
    pub fn state(&self, slot: u8) -> &SlotState {
        static ABSENT: SlotState = SlotState::Absent;
        match index_of(slot) {
            Some(idx) => &self.slots[idx],
            None => &ABSENT,
        }
    }

    /// Apply one event. Returns true when the slot state changed, so a
    /// render layer can skip redraws for suppressed duplicates.
    pub fn apply(&mut self, event: &LifecycleEvent) -> bool {
        let Some(idx) = index_of(event.agent_id()) else {
            tracing::warn!(agent_id = event.agent_id(), "Ignoring event for out-of-range slot");
            return false;
        };
        let slot = &mut self.slots[idx];

        match event {
            // Full reset, idempotent: a reused slot starts over regardless
            // of whatever state the previous job left behind.
            LifecycleEvent::AgentCreated { task_name, .. } => {
                let next = SlotState::Thinking {
                    task_name: task_name.clone(),
                };
                let changed = *slot != next;
                *slot = next;
                changed
            }

            LifecycleEvent::AgentStartWorking { .. } => match slot {
                SlotState::Thinking { .. } | SlotState::Absent => {
                    *slot = SlotState::Working {
                        task_name: slot.task_name().to_string(),
                    };
                    true
                }
                // Duplicate or late arrival after testing already started.
                SlotState::Working { .. } | SlotState::Testing { .. } => false,
            },

            LifecycleEvent::AgentStartTesting {
                preview_link,
                validation_link,
                ..
            } => match slot {
                SlotState::Testing { .. } => false,
                // Working is the expected predecessor; Thinking means the
                // working event was lost; Absent means everything before
                // this was lost. All three move forward.
                SlotState::Working { .. } | SlotState::Thinking { .. } | SlotState::Absent => {
                    *slot = SlotState::Testing {
                        task_name: slot.task_name().to_string(),
                        preview_link: preview_link.clone(),
                        validation_link: validation_link.clone(),
                    };
                    true
                }
            },
        }
    }

    /// Observer-driven reset (e.g. closing a result view). Discards any
    /// attached links; independent of the event stream.
    pub fn dismiss(&mut self, slot: u8) {
        if let Some(idx) = index_of(slot) {
            self.slots[idx] = SlotState::Absent;
        }
    }

    /// Slots currently holding any non-absent state.
    pub fn active(&self) -> impl Iterator<Item = (u8, &SlotState)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != SlotState::Absent)
            .map(|(i, s)| (i as u8 + MIN_SLOT, s))
    }
}

fn index_of(slot: u8) -> Option<usize> {
    (MIN_SLOT..=MAX_SLOT)
        .contains(&slot)
        .then(|| (slot - MIN_SLOT) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(slot: u8, task: &str) -> LifecycleEvent {
        LifecycleEvent::AgentCreated {
            agent_id: slot,
            task_name: task.to_string(),
        }
    }

    fn working(slot: u8) -> LifecycleEvent {
        LifecycleEvent::AgentStartWorking { agent_id: slot }
    }

    fn testing(slot: u8, preview: &str, validation: &str) -> LifecycleEvent {
        LifecycleEvent::AgentStartTesting {
            agent_id: slot,
            preview_link: preview.to_string(),
            validation_link: validation.to_string(),
        }
    }

    #[test]
    fn test_happy_path_progression() {
        let mut slots = AgentSlots::new();
        assert!(slots.apply(&created(1, "fix auth")));
        assert!(slots.apply(&working(1)));
        assert!(slots.apply(&testing(1, "https://p", "https://v")));
        match slots.state(1) {
            SlotState::Testing {
                task_name,
                preview_link,
                validation_link,
            } => {
                assert_eq!(task_name, "fix auth");
                assert_eq!(preview_link, "https://p");
                assert_eq!(validation_link, "https://v");
            }
            other => panic!("Expected Testing, got {:?}", other),
        }
    }

    #[test]
    fn test_created_twice_is_idempotent() {
        let mut slots = AgentSlots::new();
        assert!(slots.apply(&created(3, "x")));
        // Second application leaves the slot in Thinking, unchanged.
        assert!(!slots.apply(&created(3, "x")));
        assert_eq!(
            *slots.state(3),
            SlotState::Thinking {
                task_name: "x".to_string()
            }
        );
    }

    #[test]
    fn test_created_resets_a_reused_slot() {
        let mut slots = AgentSlots::new();
        slots.apply(&created(2, "old job"));
        slots.apply(&working(2));
        slots.apply(&testing(2, "https://p", "https://v"));
        // New job reuses slot 2: full reset, links discarded.
        assert!(slots.apply(&created(2, "new job")));
        assert_eq!(
            *slots.state(2),
            SlotState::Thinking {
                task_name: "new job".to_string()
            }
        );
    }

    #[test]
    fn test_working_on_absent_slot_is_synthesized() {
        let mut slots = AgentSlots::new();
        assert!(slots.apply(&working(4)));
        assert!(matches!(slots.state(4), SlotState::Working { .. }));
    }

    #[test]
    fn test_testing_on_absent_slot_is_synthesized() {
        let mut slots = AgentSlots::new();
        assert!(slots.apply(&testing(5, "https://p", "")));
        match slots.state(5) {
            SlotState::Testing { preview_link, .. } => assert_eq!(preview_link, "https://p"),
            other => panic!("Expected Testing, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_working_is_suppressed() {
        let mut slots = AgentSlots::new();
        slots.apply(&created(6, "t"));
        assert!(slots.apply(&working(6)));
        assert!(!slots.apply(&working(6)));
        assert!(matches!(slots.state(6), SlotState::Working { .. }));
    }

    #[test]
    fn test_late_working_after_testing_is_ignored() {
        let mut slots = AgentSlots::new();
        slots.apply(&created(7, "t"));
        slots.apply(&testing(7, "https://p", "https://v"));
        // The working event arrives late, reordered behind testing.
        assert!(!slots.apply(&working(7)));
        assert!(matches!(slots.state(7), SlotState::Testing { .. }));
    }

    #[test]
    fn test_testing_from_thinking_skips_working() {
        let mut slots = AgentSlots::new();
        slots.apply(&created(8, "t"));
        assert!(slots.apply(&testing(8, "", "")));
        assert!(matches!(slots.state(8), SlotState::Testing { .. }));
    }

    #[test]
    fn test_dismiss_resets_and_discards_links() {
        let mut slots = AgentSlots::new();
        slots.apply(&created(1, "t"));
        slots.apply(&testing(1, "https://p", "https://v"));
        slots.dismiss(1);
        assert_eq!(*slots.state(1), SlotState::Absent);
    }

    #[test]
    fn test_out_of_range_slot_is_ignored() {
        let mut slots = AgentSlots::new();
        assert!(!slots.apply(&created(0, "t")));
        assert!(!slots.apply(&created(10, "t")));
        assert!(slots.active().next().is_none());
    }

    #[test]
    fn test_active_lists_only_non_absent() {
        let mut slots = AgentSlots::new();
        slots.apply(&created(2, "a"));
        slots.apply(&created(9, "b"));
        let active: Vec<u8> = slots.active().map(|(id, _)| id).collect();
        assert_eq!(active, vec![2, 9]);
    }
}

//! Work item state machine over message types.
//!
//! ```text
//! placed ──► submit ──► processing ──► processed ──► ingested ──► clean
//!              ▲             │              │
//!              │             ▼              └──► ingesterror
//!            rescue ◄──── error ──► terminated
//!                                       ▲
//!                  cancel ──────────────┘
//! ```
//!
//! `submit` may also go straight to `error` when no resource tier is left.
//! `cancel` is reachable from every non-terminal state.

use crate::error::{Error, Result};
use crate::messages::MessageType;

impl MessageType {
    /// Returns true if no transition leaves this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Terminated | Self::Clean | Self::Ingesterror | Self::Broadcast
        )
    }

    /// Returns true if the item can be rescued from this state.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Error)
    }

    /// Returns true if an operator may cancel from this state.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Cancel)
    }

    /// Returns the states reachable in one step.
    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        let mut next = match self {
            Self::Placed | Self::Rescue => vec![Self::Submit],
            Self::Submit => vec![Self::Processing, Self::Error],
            Self::Processing => vec![Self::Processed, Self::Error],
            Self::Error => vec![Self::Rescue, Self::Terminated],
            Self::Processed => vec![Self::Ingested, Self::Ingesterror],
            Self::Ingested => vec![Self::Clean],
            Self::Cancel => vec![Self::Terminated],
            Self::Terminated | Self::Clean | Self::Ingesterror | Self::Broadcast => vec![],
        };
        if self.is_cancellable() {
            next.push(Self::Cancel);
        }
        next
    }

    /// Returns true if `target` is reachable in one step.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Checks a transition.
///
/// # Errors
///
/// Returns [`Error::InvalidTransition`] if the move is not allowed.
pub fn check_transition(from: MessageType, to: MessageType) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            MessageType::Placed,
            MessageType::Submit,
            MessageType::Processing,
            MessageType::Processed,
            MessageType::Ingested,
            MessageType::Clean,
        ];
        for pair in path.windows(2) {
            assert!(check_transition(pair[0], pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn retry_loop_is_allowed() {
        for (from, to) in [
            (MessageType::Processing, MessageType::Error),
            (MessageType::Error, MessageType::Rescue),
            (MessageType::Rescue, MessageType::Submit),
            (MessageType::Error, MessageType::Terminated),
            (MessageType::Cancel, MessageType::Terminated),
            (MessageType::Submit, MessageType::Error),
        ] {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn illegal_moves_are_rejected() {
        for (from, to) in [
            (MessageType::Placed, MessageType::Processed),
            (MessageType::Clean, MessageType::Rescue),
            (MessageType::Ingested, MessageType::Rescue),
            (MessageType::Terminated, MessageType::Submit),
            (MessageType::Cancel, MessageType::Cancel),
        ] {
            let err = check_transition(from, to).unwrap_err();
            assert!(matches!(err, Error::InvalidTransition { .. }), "{from} -> {to}");
        }
    }

    #[test]
    fn cancel_reachable_from_non_terminal_states() {
        for state in MessageType::ALL {
            assert_eq!(
                state.can_transition_to(MessageType::Cancel),
                state.is_cancellable(),
                "{state}"
            );
        }
        assert!(!MessageType::Clean.is_retryable());
        assert!(!MessageType::Ingested.is_retryable());
        assert!(MessageType::Error.is_retryable());
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for state in MessageType::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(state.valid_transitions().is_empty(), "{state}");
        }
    }
}

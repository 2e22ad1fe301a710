//! Peer negotiation state machine for PeerDrop.
//!
//! Tracks one negotiation attempt between two paired sessions: who offers,
//! whether the remote description has been applied, and which remote
//! candidates must wait until it has. The machine is pure: every event
//! yields a new state plus a list of actions for the driver in
//! `drop-client` to execute against the real peer connection.
//!
//! Remote candidates that arrive before the remote description is applied
//! are buffered and flushed, in arrival order, once it is.

use peerdrop_types::{IceCandidate, SessionDescription};

/// Which side of the negotiation this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent the `connect` request; creates the data channel and the offer.
    Initiator,
    /// Accepted a pairing; answers the offer.
    Responder,
}

/// Negotiation state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// No negotiation in progress.
    Idle {
        /// Remote candidates received before any offer.
        pending: Vec<IceCandidate>,
    },
    /// Offer/answer exchange in progress.
    Negotiating {
        /// Our side of the exchange.
        role: Role,
        /// Whether the remote description has been applied.
        remote_applied: bool,
        /// Remote candidates waiting for the remote description.
        pending: Vec<IceCandidate>,
    },
    /// The data channel is open.
    Open {
        /// Our side of the exchange.
        role: Role,
    },
    /// The attempt ended; a fresh pairing starts a new one.
    Closed,
}

impl NegotiationState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle {
            pending: Vec::new(),
        }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is responsible
    /// for executing the returned actions and feeding their outcome back
    /// (for example [`NegotiationEvent::RemoteDescriptionApplied`]).
    pub fn on_event(self, event: NegotiationEvent) -> (Self, Vec<NegotiationAction>) {
        use NegotiationAction as A;
        use NegotiationEvent as E;

        match (self, event) {
            // Pairing confirmed by the relay
            (Self::Idle { pending }, E::PeerReady { initiator: true }) => (
                Self::Negotiating {
                    role: Role::Initiator,
                    remote_applied: false,
                    pending,
                },
                vec![A::StartOffer],
            ),
            (Self::Idle { pending }, E::PeerReady { initiator: false }) => {
                (Self::Idle { pending }, vec![])
            }
            (Self::Closed, E::PeerReady { initiator }) => {
                Self::new().on_event(E::PeerReady { initiator })
            }

            // Offers
            (Self::Idle { pending }, E::RemoteOffer(offer)) => (
                Self::Negotiating {
                    role: Role::Responder,
                    remote_applied: false,
                    pending,
                },
                vec![A::AcceptOffer(offer)],
            ),
            (
                Self::Negotiating {
                    role: Role::Responder,
                    remote_applied: false,
                    pending,
                },
                E::RemoteOffer(offer),
            ) => (
                Self::Negotiating {
                    role: Role::Responder,
                    remote_applied: false,
                    pending,
                },
                vec![A::AcceptOffer(offer)],
            ),

            // Answers
            (
                Self::Negotiating {
                    role: Role::Initiator,
                    remote_applied: false,
                    pending,
                },
                E::RemoteAnswer(answer),
            ) => (
                Self::Negotiating {
                    role: Role::Initiator,
                    remote_applied: false,
                    pending,
                },
                vec![A::ApplyAnswer(answer)],
            ),

            // Remote description applied: flush buffered candidates
            (
                Self::Negotiating {
                    role,
                    remote_applied: false,
                    pending,
                },
                E::RemoteDescriptionApplied,
            ) => {
                let actions = if pending.is_empty() {
                    vec![]
                } else {
                    vec![A::AddCandidates(pending)]
                };
                (
                    Self::Negotiating {
                        role,
                        remote_applied: true,
                        pending: Vec::new(),
                    },
                    actions,
                )
            }

            // Remote candidates
            (Self::Idle { mut pending }, E::RemoteCandidate(candidate)) => {
                pending.push(candidate);
                (Self::Idle { pending }, vec![])
            }
            (
                Self::Negotiating {
                    role,
                    remote_applied: false,
                    mut pending,
                },
                E::RemoteCandidate(candidate),
            ) => {
                pending.push(candidate);
                (
                    Self::Negotiating {
                        role,
                        remote_applied: false,
                        pending,
                    },
                    vec![],
                )
            }
            (
                state @ Self::Negotiating {
                    remote_applied: true,
                    ..
                },
                E::RemoteCandidate(candidate),
            ) => (state, vec![A::AddCandidates(vec![candidate])]),
            (state @ Self::Open { .. }, E::RemoteCandidate(candidate)) => {
                (state, vec![A::AddCandidates(vec![candidate])])
            }

            // Local candidates are only forwarded while negotiating
            (state @ Self::Negotiating { .. }, E::LocalCandidate(candidate)) => {
                (state, vec![A::SendCandidate(candidate)])
            }

            // Channel open
            (Self::Negotiating { role, .. }, E::ChannelOpened) => (
                Self::Open { role },
                vec![A::EmitEvent(NegotiationNotice::Opened { role })],
            ),

            // Teardown
            (Self::Closed, E::ChannelClosed | E::PeerGone | E::CloseRequested) => {
                (Self::Closed, vec![])
            }
            (_, E::ChannelClosed) => close("channel closed"),
            (_, E::PeerGone) => close("peer disconnected"),
            (_, E::CloseRequested) => close("close requested"),

            // Negotiation payloads that do not fit the current state
            (state, E::RemoteOffer(_)) => {
                let reason = format!("unexpected offer while {}", state.phase());
                (state, vec![A::Discard { reason }])
            }
            (state, E::RemoteAnswer(_)) => {
                let reason = format!("unexpected answer while {}", state.phase());
                (state, vec![A::Discard { reason }])
            }
            (state, E::RemoteCandidate(_)) => {
                let reason = format!("unexpected candidate while {}", state.phase());
                (state, vec![A::Discard { reason }])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the data channel is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if an offer/answer exchange is in progress.
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Negotiating { .. })
    }

    /// Our role, once negotiation has started.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Negotiating { role, .. } | Self::Open { role } => Some(*role),
            _ => None,
        }
    }

    /// Number of remote candidates waiting for the remote description.
    pub fn pending_candidates(&self) -> usize {
        match self {
            Self::Idle { pending } | Self::Negotiating { pending, .. } => pending.len(),
            _ => 0,
        }
    }

    /// Short name of the current phase, for logging.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "idle",
            Self::Negotiating { .. } => "negotiating",
            Self::Open { .. } => "open",
            Self::Closed => "closed",
        }
    }
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self::new()
    }
}

fn close(reason: &str) -> (NegotiationState, Vec<NegotiationAction>) {
    (
        NegotiationState::Closed,
        vec![
            NegotiationAction::ClosePeer,
            NegotiationAction::EmitEvent(NegotiationNotice::Closed {
                reason: reason.to_string(),
            }),
        ],
    )
}

/// Events that drive a negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// The relay reported the pairing (`connected`).
    PeerReady {
        /// Whether this session sent the `connect` request.
        initiator: bool,
    },
    /// The remote device sent an offer.
    RemoteOffer(SessionDescription),
    /// The remote device sent an answer.
    RemoteAnswer(SessionDescription),
    /// The remote device sent a candidate.
    RemoteCandidate(IceCandidate),
    /// The driver finished applying the remote description.
    RemoteDescriptionApplied,
    /// The local peer connection produced a candidate.
    LocalCandidate(IceCandidate),
    /// The data channel opened.
    ChannelOpened,
    /// The data channel closed.
    ChannelClosed,
    /// The relay reported the peer gone (`disconnected`).
    PeerGone,
    /// The application asked to end the session.
    CloseRequested,
}

/// Actions to be executed by the negotiation driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Create the peer connection and the data channel, then send an offer.
    StartOffer,
    /// Apply the remote offer, then send an answer.
    AcceptOffer(SessionDescription),
    /// Apply the remote answer.
    ApplyAnswer(SessionDescription),
    /// Add remote candidates to the peer connection, in order.
    AddCandidates(Vec<IceCandidate>),
    /// Forward a local candidate through the relay.
    SendCandidate(IceCandidate),
    /// Close the peer connection.
    ClosePeer,
    /// Drop a negotiation payload that does not fit the current state.
    Discard {
        /// Why the payload was dropped.
        reason: String,
    },
    /// Notify the session.
    EmitEvent(NegotiationNotice),
}

/// Notifications emitted to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationNotice {
    /// The data channel is open.
    Opened {
        /// Our side of the exchange.
        role: Role,
    },
    /// The attempt ended.
    Closed {
        /// Reason for closing.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"))
    }

    fn negotiating_initiator() -> NegotiationState {
        let (state, _) = NegotiationState::new().on_event(NegotiationEvent::PeerReady {
            initiator: true,
        });
        state
    }

    // ===========================================
    // Role selection
    // ===========================================

    #[test]
    fn starts_idle() {
        let state = NegotiationState::new();
        assert_eq!(state.phase(), "idle");
        assert!(state.role().is_none());
    }

    #[test]
    fn initiator_starts_offer_on_peer_ready() {
        let (state, actions) = NegotiationState::new()
            .on_event(NegotiationEvent::PeerReady { initiator: true });
        assert_eq!(state.role(), Some(Role::Initiator));
        assert_eq!(actions, vec![NegotiationAction::StartOffer]);
    }

    #[test]
    fn responder_waits_for_offer() {
        let (state, actions) = NegotiationState::new()
            .on_event(NegotiationEvent::PeerReady { initiator: false });
        assert_eq!(state.phase(), "idle");
        assert!(actions.is_empty());
    }

    #[test]
    fn responder_accepts_offer() {
        let offer = SessionDescription::offer("v=0");
        let (state, actions) =
            NegotiationState::new().on_event(NegotiationEvent::RemoteOffer(offer.clone()));
        assert_eq!(state.role(), Some(Role::Responder));
        assert_eq!(actions, vec![NegotiationAction::AcceptOffer(offer)]);
    }

    // ===========================================
    // Candidate buffering
    // ===========================================

    #[test]
    fn candidates_before_offer_are_buffered_then_flushed_in_order() {
        let mut state = NegotiationState::new();
        for n in 1..=3 {
            let (next, actions) = state.on_event(NegotiationEvent::RemoteCandidate(candidate(n)));
            assert!(actions.is_empty());
            state = next;
        }
        assert_eq!(state.pending_candidates(), 3);

        let (state, actions) =
            state.on_event(NegotiationEvent::RemoteOffer(SessionDescription::offer("v=0")));
        assert!(matches!(actions[0], NegotiationAction::AcceptOffer(_)));
        assert_eq!(state.pending_candidates(), 3);

        let (state, actions) = state.on_event(NegotiationEvent::RemoteDescriptionApplied);
        assert_eq!(
            actions,
            vec![NegotiationAction::AddCandidates(vec![
                candidate(1),
                candidate(2),
                candidate(3)
            ])]
        );
        assert_eq!(state.pending_candidates(), 0);
    }

    #[test]
    fn initiator_buffers_until_answer_applied() {
        let (state, actions) =
            negotiating_initiator().on_event(NegotiationEvent::RemoteCandidate(candidate(1)));
        assert!(actions.is_empty());

        let answer = SessionDescription::answer("v=0");
        let (state, actions) = state.on_event(NegotiationEvent::RemoteAnswer(answer.clone()));
        assert_eq!(actions, vec![NegotiationAction::ApplyAnswer(answer)]);

        let (state, actions) = state.on_event(NegotiationEvent::RemoteDescriptionApplied);
        assert_eq!(
            actions,
            vec![NegotiationAction::AddCandidates(vec![candidate(1)])]
        );

        let (_, actions) = state.on_event(NegotiationEvent::RemoteCandidate(candidate(2)));
        assert_eq!(
            actions,
            vec![NegotiationAction::AddCandidates(vec![candidate(2)])]
        );
    }

    #[test]
    fn no_flush_when_nothing_buffered() {
        let (state, _) = negotiating_initiator()
            .on_event(NegotiationEvent::RemoteAnswer(SessionDescription::answer("v=0")));
        let (_, actions) = state.on_event(NegotiationEvent::RemoteDescriptionApplied);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Local candidates
    // ===========================================

    #[test]
    fn local_candidates_forwarded_while_negotiating() {
        let (_, actions) =
            negotiating_initiator().on_event(NegotiationEvent::LocalCandidate(candidate(9)));
        assert_eq!(actions, vec![NegotiationAction::SendCandidate(candidate(9))]);
    }

    #[test]
    fn local_candidates_after_open_are_not_forwarded() {
        let (state, _) = negotiating_initiator().on_event(NegotiationEvent::ChannelOpened);
        let (_, actions) = state.on_event(NegotiationEvent::LocalCandidate(candidate(9)));
        assert!(actions.is_empty());
    }

    // ===========================================
    // Open / close
    // ===========================================

    #[test]
    fn channel_open_emits_opened() {
        let (state, actions) = negotiating_initiator().on_event(NegotiationEvent::ChannelOpened);
        assert!(state.is_open());
        assert_eq!(
            actions,
            vec![NegotiationAction::EmitEvent(NegotiationNotice::Opened {
                role: Role::Initiator
            })]
        );
    }

    #[test]
    fn peer_gone_closes_peer() {
        let (state, _) = negotiating_initiator().on_event(NegotiationEvent::ChannelOpened);
        let (state, actions) = state.on_event(NegotiationEvent::PeerGone);
        assert_eq!(state, NegotiationState::Closed);
        assert_eq!(actions[0], NegotiationAction::ClosePeer);
        assert!(matches!(
            &actions[1],
            NegotiationAction::EmitEvent(NegotiationNotice::Closed { reason }) if reason == "peer disconnected"
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let (state, _) = negotiating_initiator().on_event(NegotiationEvent::CloseRequested);
        let (state, actions) = state.on_event(NegotiationEvent::ChannelClosed);
        assert_eq!(state, NegotiationState::Closed);
        assert!(actions.is_empty());
    }

    #[test]
    fn fresh_pairing_after_close_restarts() {
        let (state, _) = negotiating_initiator().on_event(NegotiationEvent::PeerGone);
        let (state, actions) = state.on_event(NegotiationEvent::PeerReady { initiator: true });
        assert!(state.is_negotiating());
        assert_eq!(actions, vec![NegotiationAction::StartOffer]);
    }

    // ===========================================
    // Stale payloads
    // ===========================================

    #[test]
    fn answer_while_idle_is_discarded() {
        let (state, actions) = NegotiationState::new()
            .on_event(NegotiationEvent::RemoteAnswer(SessionDescription::answer("v=0")));
        assert_eq!(state.phase(), "idle");
        assert!(matches!(actions[0], NegotiationAction::Discard { .. }));
    }

    #[test]
    fn second_answer_is_discarded() {
        let (state, _) = negotiating_initiator()
            .on_event(NegotiationEvent::RemoteAnswer(SessionDescription::answer("a")));
        let (state, _) = state.on_event(NegotiationEvent::RemoteDescriptionApplied);
        let (_, actions) =
            state.on_event(NegotiationEvent::RemoteAnswer(SessionDescription::answer("b")));
        assert!(matches!(actions[0], NegotiationAction::Discard { .. }));
    }

    #[test]
    fn offer_to_initiator_is_discarded() {
        let (state, actions) = negotiating_initiator()
            .on_event(NegotiationEvent::RemoteOffer(SessionDescription::offer("v=0")));
        assert_eq!(state.role(), Some(Role::Initiator));
        assert!(matches!(actions[0], NegotiationAction::Discard { .. }));
    }

    #[test]
    fn candidate_after_close_is_discarded() {
        let (state, _) = negotiating_initiator().on_event(NegotiationEvent::PeerGone);
        let (_, actions) = state.on_event(NegotiationEvent::RemoteCandidate(candidate(1)));
        assert!(matches!(actions[0], NegotiationAction::Discard { .. }));
    }

    #[test]
    fn responder_may_retry_offer_before_it_applies() {
        let offer = SessionDescription::offer("v=0");
        let (state, _) =
            NegotiationState::new().on_event(NegotiationEvent::RemoteOffer(offer.clone()));
        let (_, actions) = state.on_event(NegotiationEvent::RemoteOffer(offer.clone()));
        assert_eq!(actions, vec![NegotiationAction::AcceptOffer(offer)]);
    }
}

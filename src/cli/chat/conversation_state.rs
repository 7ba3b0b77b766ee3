use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cli::chat::session::{IdentityGenerator, SessionToken};
use crate::search_client::{Record, SearchError, SearchResponse};

/// Assistant text when a recommendation arrives without any.
pub const DEFAULT_RECOMMENDATION: &str = "Here are the recommended items based on your preferences:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    FollowUp,
    Recommendation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Only set on assistant turns.
    pub kind: Option<TurnKind>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            kind: None,
        }
    }

    pub fn assistant(content: impl Into<String>, kind: TurnKind) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending,
    AwaitingAnswer,
    Ready,
}

/// Everything the renderer needs, frozen at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub phase: Phase,
    /// The latest exchange only: at most one assistant turn followed by the
    /// user turn that produced it.
    pub turns: Vec<Turn>,
    pub ready_for_recommendation: bool,
    /// Non-empty only when `ready_for_recommendation` is set.
    pub results: Vec<Record>,
    pub pending: bool,
    pub last_error: Option<String>,
}

impl Snapshot {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            turns: Vec::new(),
            ready_for_recommendation: false,
            results: Vec::new(),
            pending: false,
            last_error: None,
        }
    }

    /// The assistant turn on display, if any.
    pub fn assistant_turn(&self) -> Option<&Turn> {
        self.turns.first().filter(|turn| turn.role == Role::Assistant)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("query is empty")]
    BlankQuery,

    #[error("a search is already in progress")]
    RequestInFlight,
}

/// Ticket for one in-flight search. The response must be handed back along
/// with it so that answers for an abandoned session can be recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub query: String,
    pub session: SessionToken,
    sequence: u64,
}

#[derive(Debug)]
struct InFlight {
    sequence: u64,
    session: SessionToken,
    previous_phase: Phase,
}

/// The client side of one conversation.
///
/// Transitions never edit the current snapshot; each one publishes a new one.
pub struct ConversationState {
    snapshot: Arc<Snapshot>,
    session: SessionToken,
    identity: Box<dyn IdentityGenerator>,
    input: String,
    in_flight: Option<InFlight>,
    next_sequence: u64,
}

impl ConversationState {
    pub fn new(mut identity: Box<dyn IdentityGenerator>) -> Self {
        let session = identity.generate();
        debug!("Started session {}", session);

        Self {
            snapshot: Arc::new(Snapshot::idle()),
            session,
            identity,
            input: String::new(),
            in_flight: None,
            next_sequence: 0,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn phase(&self) -> Phase {
        self.snapshot.phase
    }

    pub fn session(&self) -> &SessionToken {
        &self.session
    }

    /// Text the user has typed but not yet had answered.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Start a search for `query`. Blank queries and overlapping submissions
    /// are rejected without touching the state.
    pub fn submit(&mut self, query: &str) -> Result<PendingRequest, SubmitError> {
        if query.trim().is_empty() {
            return Err(SubmitError::BlankQuery);
        }
        if self.in_flight.is_some() {
            return Err(SubmitError::RequestInFlight);
        }

        self.next_sequence += 1;
        let request = PendingRequest {
            query: query.to_string(),
            session: self.session.clone(),
            sequence: self.next_sequence,
        };

        self.input = query.to_string();
        self.in_flight = Some(InFlight {
            sequence: request.sequence,
            session: request.session.clone(),
            previous_phase: self.snapshot.phase,
        });
        self.publish(Snapshot {
            phase: Phase::Pending,
            pending: true,
            last_error: None,
            ..(*self.snapshot).clone()
        });

        Ok(request)
    }

    /// Apply a successful response. Returns `false` if the response belongs
    /// to a request that is no longer current and was dropped.
    pub fn on_success(&mut self, request: &PendingRequest, response: SearchResponse) -> bool {
        if self.take_in_flight(request).is_none() {
            return false;
        }

        let current = (*self.snapshot).clone();
        let ready = response.ready_for_recommendation;
        let follow_up = response.follow_up_question.filter(|text| !text.is_empty());

        let (turns, results) = if ready {
            let content = response
                .recommendation
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| DEFAULT_RECOMMENDATION.to_string());
            (
                vec![
                    Turn::assistant(content, TurnKind::Recommendation),
                    Turn::user(request.query.clone()),
                ],
                response.citations.unwrap_or_default(),
            )
        } else if let Some(question) = follow_up {
            (
                vec![
                    Turn::assistant(question, TurnKind::FollowUp),
                    Turn::user(request.query.clone()),
                ],
                Vec::new(),
            )
        } else {
            // No recommendation and no question: the previous exchange stays
            // on display.
            warn!("Search response had neither a recommendation nor a follow-up question");
            (current.turns, Vec::new())
        };

        self.input.clear();
        self.publish(Snapshot {
            phase: if ready { Phase::Ready } else { Phase::AwaitingAnswer },
            turns,
            ready_for_recommendation: ready,
            results,
            pending: false,
            last_error: None,
        });

        true
    }

    /// Record a failed search. Turns, results and the typed input are kept
    /// so the same text can be retried.
    pub fn on_failure(&mut self, request: &PendingRequest, error: &SearchError) -> bool {
        let Some(in_flight) = self.take_in_flight(request) else {
            return false;
        };

        debug!("Search for session {} failed: {}", in_flight.session, error);

        self.publish(Snapshot {
            phase: in_flight.previous_phase,
            pending: false,
            last_error: Some(error.user_message().to_string()),
            ..(*self.snapshot).clone()
        });

        true
    }

    /// Drop the conversation and start over under a fresh session token.
    pub fn reset(&mut self) {
        let previous = std::mem::replace(&mut self.session, self.identity.generate());
        debug!("Reset session {} -> {}", previous, self.session);

        self.in_flight = None;
        self.input.clear();
        self.publish(Snapshot::idle());
    }

    fn take_in_flight(&mut self, request: &PendingRequest) -> Option<InFlight> {
        let matches = self.in_flight.as_ref().is_some_and(|in_flight| {
            in_flight.sequence == request.sequence && in_flight.session == request.session
        }) && request.session == self.session;

        if !matches {
            debug!(
                "Discarding stale response for session {} (current session {})",
                request.session, self.session
            );
            return None;
        }

        self.in_flight.take()
    }

    fn publish(&mut self, next: Snapshot) {
        self.snapshot = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::chat::session::SequentialIdentity;

    fn state() -> ConversationState {
        ConversationState::new(Box::new(SequentialIdentity::new("session")))
    }

    fn response(json: &str) -> SearchResponse {
        serde_json::from_str(json).expect("valid response")
    }

    fn server_error() -> SearchError {
        SearchError::Status(500)
    }

    #[test]
    fn starts_idle_with_a_session() {
        let state = state();
        let snapshot = state.snapshot();

        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.session().as_str(), "session-1");
        assert!(snapshot.turns.is_empty());
        assert!(!snapshot.ready_for_recommendation);
        assert!(snapshot.results.is_empty());
        assert!(!snapshot.pending);
        assert_eq!(snapshot.last_error, None);
    }

    #[test]
    fn blank_queries_are_rejected_without_state_change() {
        let mut state = state();
        let before = state.snapshot();

        for query in ["", "   ", "\t\n"] {
            assert_eq!(state.submit(query), Err(SubmitError::BlankQuery));
        }

        assert_eq!(state.phase(), Phase::Idle);
        assert!(Arc::ptr_eq(&before, &state.snapshot()));
    }

    #[test]
    fn submit_moves_to_pending_and_tags_session() {
        let mut state = state();
        let request = state.submit("running shoes").unwrap();

        assert_eq!(state.phase(), Phase::Pending);
        assert!(state.snapshot().pending);
        assert_eq!(request.query, "running shoes");
        assert_eq!(request.session.as_str(), "session-1");
        assert_eq!(state.input(), "running shoes");
    }

    #[test]
    fn second_submit_while_pending_is_rejected() {
        let mut state = state();
        state.submit("first").unwrap();

        assert_eq!(state.submit("second"), Err(SubmitError::RequestInFlight));
        assert_eq!(state.input(), "first");
    }

    #[test]
    fn recommendation_populates_turns_and_results() {
        let mut state = state();
        let request = state.submit("cheap things").unwrap();

        let applied = state.on_success(
            &request,
            response(
                r#"{"ready_for_recommendation":true,"recommendation":"Try these",
                    "citations":[{"id":1,"price":9.5},{"id":2,"price":null,"color":"red"}]}"#,
            ),
        );

        let snapshot = state.snapshot();
        assert!(applied);
        assert_eq!(snapshot.phase, Phase::Ready);
        assert!(snapshot.ready_for_recommendation);
        assert!(!snapshot.pending);
        assert_eq!(
            snapshot.turns,
            vec![
                Turn::assistant("Try these", TurnKind::Recommendation),
                Turn::user("cheap things"),
            ]
        );
        assert_eq!(snapshot.results.len(), 2);
        assert_eq!(state.input(), "");
    }

    #[test]
    fn follow_up_replaces_turns_and_clears_results() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":true,"citations":[{"name":"a"}]}"#),
        );

        let request = state.submit("actually, boots").unwrap();
        state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":false,"follow_up_question":"What's your budget?"}"#),
        );

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, Phase::AwaitingAnswer);
        assert_eq!(
            snapshot.turns,
            vec![
                Turn::assistant("What's your budget?", TurnKind::FollowUp),
                Turn::user("actually, boots"),
            ]
        );
        assert!(snapshot.results.is_empty());
        assert!(!snapshot.ready_for_recommendation);
    }

    #[test]
    fn recommendation_without_text_uses_default_message() {
        let mut state = state();
        let request = state.submit("anything").unwrap();
        state.on_success(&request, response(r#"{"ready_for_recommendation":true}"#));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(
            snapshot.assistant_turn().map(|t| t.content.as_str()),
            Some(DEFAULT_RECOMMENDATION)
        );
        assert!(snapshot.results.is_empty());
    }

    #[test]
    fn empty_recommendation_text_uses_default_message() {
        let mut state = state();
        let request = state.submit("anything").unwrap();
        state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":true,"recommendation":""}"#),
        );

        assert_eq!(
            state.snapshot().assistant_turn().map(|t| t.content.as_str()),
            Some(DEFAULT_RECOMMENDATION)
        );
    }

    // The displayed exchange is left as it was when the service neither asks
    // nor recommends. This mirrors the existing client rather than inventing
    // a fallback message.
    #[test]
    fn response_without_question_or_recommendation_keeps_turns() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":false,"follow_up_question":"Size?"}"#),
        );
        let before = state.snapshot().turns.clone();

        let request = state.submit("42").unwrap();
        let applied = state.on_success(&request, response(r#"{"ready_for_recommendation":false}"#));

        let snapshot = state.snapshot();
        assert!(applied);
        assert_eq!(snapshot.turns, before);
        assert_eq!(snapshot.phase, Phase::AwaitingAnswer);
        assert!(snapshot.results.is_empty());
        assert_eq!(state.input(), "");
    }

    #[test]
    fn response_without_anything_from_idle_shows_no_turn() {
        let mut state = state();
        let request = state.submit("hello").unwrap();
        state.on_success(&request, response(r#"{"ready_for_recommendation":false}"#));

        assert!(state.snapshot().turns.is_empty());
        assert!(state.snapshot().assistant_turn().is_none());
    }

    #[test]
    fn results_are_dropped_when_not_ready() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.on_success(
            &request,
            response(
                r#"{"ready_for_recommendation":false,"follow_up_question":"Color?",
                    "citations":[{"name":"a"}]}"#,
            ),
        );

        assert!(state.snapshot().results.is_empty());
    }

    #[test]
    fn failure_restores_previous_phase_and_keeps_input() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":false,"follow_up_question":"Size?"}"#),
        );
        let turns = state.snapshot().turns.clone();

        let request = state.submit("42").unwrap();
        assert!(state.on_failure(&request, &server_error()));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, Phase::AwaitingAnswer);
        assert!(!snapshot.pending);
        assert_eq!(snapshot.turns, turns);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("An error occurred while searching. Please try again.")
        );
        assert_eq!(state.input(), "42");
    }

    #[test]
    fn next_submit_clears_error() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.on_failure(&request, &server_error());
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.snapshot().last_error.is_some());

        state.submit("shoes").unwrap();
        assert_eq!(state.snapshot().last_error, None);
    }

    #[test]
    fn reset_returns_to_idle_with_new_session() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":true,"citations":[{"name":"a"}]}"#),
        );
        state.set_input("draft");

        state.reset();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.turns.is_empty());
        assert!(snapshot.results.is_empty());
        assert!(!snapshot.ready_for_recommendation);
        assert_eq!(state.session().as_str(), "session-2");
        assert_eq!(state.input(), "");
    }

    #[test]
    fn late_response_after_reset_is_discarded() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.reset();

        let applied = state.on_success(
            &request,
            response(r#"{"ready_for_recommendation":true,"recommendation":"Too late"}"#),
        );

        let snapshot = state.snapshot();
        assert!(!applied);
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.turns.is_empty());
        assert!(!snapshot.ready_for_recommendation);
    }

    #[test]
    fn late_failure_after_reset_is_discarded() {
        let mut state = state();
        let request = state.submit("shoes").unwrap();
        state.reset();

        assert!(!state.on_failure(&request, &server_error()));
        assert_eq!(state.snapshot().last_error, None);
    }

    #[test]
    fn late_response_does_not_clobber_newer_request() {
        let mut state = state();
        let stale = state.submit("shoes").unwrap();
        state.reset();
        let current = state.submit("boots").unwrap();

        assert!(!state.on_success(
            &stale,
            response(r#"{"ready_for_recommendation":true,"recommendation":"old"}"#)
        ));
        assert_eq!(state.phase(), Phase::Pending);

        assert!(state.on_success(
            &current,
            response(r#"{"ready_for_recommendation":false,"follow_up_question":"new"}"#)
        ));
        assert_eq!(
            state.snapshot().assistant_turn().map(|t| t.content.as_str()),
            Some("new")
        );
    }

    #[test]
    fn snapshots_are_not_mutated_by_later_transitions() {
        let mut state = state();
        let idle = state.snapshot();
        let request = state.submit("shoes").unwrap();
        state.on_success(&request, response(r#"{"ready_for_recommendation":true}"#));

        assert_eq!(idle.phase, Phase::Idle);
        assert!(idle.turns.is_empty());
        assert_eq!(state.phase(), Phase::Ready);
    }
}

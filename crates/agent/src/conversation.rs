use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use stayql_core::domain::question::SessionId;
use stayql_core::domain::turn::{ConversationTurn, TurnFocus};
use tracing::debug;

/// Per-session rolling history plus the set of sessions with a turn in flight.
///
/// At most `max_sessions` histories are kept; the least recently used idle session is
/// dropped to make room for a new one.
pub struct ConversationStore {
    capacity: usize,
    max_sessions: usize,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    sessions: HashMap<SessionId, SessionHistory>,
    in_flight: HashSet<SessionId>,
    clock: u64,
}

#[derive(Default)]
struct SessionHistory {
    turns: VecDeque<ConversationTurn>,
    last_used: u64,
}

impl ConversationStore {
    pub fn new(capacity: usize, max_sessions: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            max_sessions: max_sessions.max(1),
            state: Mutex::new(StoreState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims the session for one turn. Returns `None` while another turn is in flight.
    pub fn try_begin(&self, session_id: &SessionId) -> Option<TurnGuard<'_>> {
        let mut state = self.lock();
        if !state.in_flight.insert(session_id.clone()) {
            return None;
        }
        Some(TurnGuard { store: self, session_id: session_id.clone() })
    }

    /// The last `limit` turns of a session, oldest first.
    pub fn recent(&self, session_id: &SessionId, limit: usize) -> Vec<ConversationTurn> {
        let state = self.lock();
        state
            .sessions
            .get(session_id)
            .map(|history| {
                let skip = history.turns.len().saturating_sub(limit);
                history.turns.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn history(&self, session_id: &SessionId) -> Vec<ConversationTurn> {
        self.recent(session_id, self.capacity)
    }

    pub fn turn_count(&self, session_id: &SessionId) -> usize {
        self.lock().sessions.get(session_id).map(|history| history.turns.len()).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_in_flight(&self, session_id: &SessionId) -> bool {
        self.lock().in_flight.contains(session_id)
    }

    fn append(&self, session_id: &SessionId, turn: ConversationTurn) {
        let mut state = self.lock();
        state.clock += 1;
        let now = state.clock;
        let history = state.sessions.entry(session_id.clone()).or_default();
        history.last_used = now;
        history.turns.push_back(turn);
        while history.turns.len() > self.capacity {
            history.turns.pop_front();
            debug!(
                event_name = "conversation.turn_evicted",
                session_id = %session_id,
                capacity = self.capacity,
                "evicted oldest conversation turn"
            );
        }

        while state.sessions.len() > self.max_sessions {
            let Some(oldest) = state
                .sessions
                .iter()
                .filter(|(id, _)| !state.in_flight.contains(*id) && *id != session_id)
                .min_by_key(|(_, history)| history.last_used)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            state.sessions.remove(&oldest);
            debug!(
                event_name = "conversation.session_evicted",
                session_id = %oldest,
                max_sessions = self.max_sessions,
                "evicted least recently used conversation"
            );
        }
    }

    fn release(&self, session_id: &SessionId) {
        self.lock().in_flight.remove(session_id);
    }
}

/// Exclusive claim on a session for the duration of one turn.
///
/// Dropping the guard without calling [`TurnGuard::commit`] releases the session and
/// leaves its history untouched.
pub struct TurnGuard<'a> {
    store: &'a ConversationStore,
    session_id: SessionId,
}

impl TurnGuard<'_> {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn commit(self, turn: ConversationTurn) {
        self.store.append(&self.session_id, turn);
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.store.release(&self.session_id);
    }
}

const LEADING_FOLLOW_UP_WORDS: [&str; 3] = ["and", "but", "also"];
const REFERENCE_WORDS: [&str; 5] = ["them", "those", "these", "that", "it"];
const FOLLOW_UP_PHRASES: [&str; 5] =
    ["what about", "how about", "instead", "rather than", "compared to"];

/// Heuristic for questions that lean on an earlier turn ("and what about Q2?").
pub fn is_follow_up(question: &str) -> bool {
    let tokens = tokenize(question);
    let Some(first) = tokens.first() else {
        return false;
    };

    if LEADING_FOLLOW_UP_WORDS.contains(&first.as_str()) {
        return true;
    }

    let and_continues = tokens
        .windows(2)
        .any(|pair| pair[0] == "and" && matches!(pair[1].as_str(), "for" | "what" | "how"));
    if and_continues {
        return true;
    }

    if tokens.iter().any(|token| REFERENCE_WORDS.contains(&token.as_str())) {
        return true;
    }

    let joined = tokens.join(" ");
    FOLLOW_UP_PHRASES.iter().any(|phrase| joined.contains(phrase))
}

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];
const DATASET_TABLES: [&str; 2] = ["reservations", "reviews"];
const AGGREGATIONS: [&str; 5] = ["AVG", "SUM", "COUNT", "MAX", "MIN"];

/// Records which periods, tables and aggregations a turn was about.
pub fn extract_focus(question: &str, sql: Option<&str>) -> TurnFocus {
    let mut periods = BTreeSet::new();
    for token in tokenize(question) {
        let is_quarter = token.len() == 2
            && token.starts_with('q')
            && matches!(token.as_bytes()[1], b'1'..=b'4');
        let is_half = token == "h1" || token == "h2";
        let is_year = token.len() == 4
            && token.chars().all(|character| character.is_ascii_digit())
            && (token.starts_with("19") || token.starts_with("20"));
        if is_quarter || is_half || is_year || MONTHS.contains(&token.as_str()) {
            periods.insert(token.to_ascii_uppercase());
        }
    }

    let mut tables = BTreeSet::new();
    let mut aggregations = BTreeSet::new();
    if let Some(sql) = sql {
        for token in tokenize(sql) {
            if DATASET_TABLES.contains(&token.as_str()) {
                tables.insert(token.clone());
            }
            let upper = token.to_ascii_uppercase();
            if AGGREGATIONS.contains(&upper.as_str()) {
                aggregations.insert(upper);
            }
        }
    }

    TurnFocus {
        periods: periods.into_iter().collect(),
        tables: tables.into_iter().collect(),
        aggregations: aggregations.into_iter().collect(),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| !(character.is_ascii_alphanumeric() || character == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

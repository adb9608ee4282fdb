use serde::{Deserialize, Serialize};
use std::fmt;

/// Transient in-world actor handle (a ped/entity handle from the host game).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef(pub i32);

impl ActorRef {
    /// Handles of zero or below never name a live actor
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

/// Stable identifier of one conversational actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique conversation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Speaker role, rendered inline at the head of every history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn tag(&self) -> &'static str {
        match self {
            Role::System => "<|system|>\n",
            Role::User => "<|user|>\n",
            Role::Assistant => "<|assistant|>\n",
        }
    }

    /// The host names the human side "Player"; every other speaker is an NPC.
    pub fn from_speaker(name: &str) -> Self {
        if name == "Player" {
            Role::User
        } else {
            Role::Assistant
        }
    }

    /// Build a role-tagged history line
    pub fn line(&self, text: &str) -> String {
        format!("{}{}", self.tag(), text)
    }
}

/// Where and under what sky the conversation is happening (latest wins)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub location: String,
    pub weather: String,
}

/// One conversation between two participants
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: ConversationId,

    /// Initiator first, target second. Never mutated after creation.
    pub participants: Vec<ParticipantId>,

    /// Role-tagged lines in conversation order
    pub history: Vec<String>,

    /// End-of-conversation memo, attached at most once
    pub summary: Option<String>,

    pub context: ConversationContext,

    /// Millis of the last append (or of archival once closed)
    pub last_activity_ms: u64,

    pub active: bool,
}

impl ConversationRecord {
    pub fn new(id: ConversationId, initiator: ParticipantId, target: ParticipantId, now_ms: u64) -> Self {
        Self {
            id,
            participants: vec![initiator, target],
            history: Vec::new(),
            summary: None,
            context: ConversationContext::default(),
            last_activity_ms: now_ms,
            active: true,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    /// Both sides of the conversation, if it has two
    pub fn pair(&self) -> Option<(ParticipantId, ParticipantId)> {
        match self.participants.as_slice() {
            [a, b, ..] => Some((*a, *b)),
            _ => None,
        }
    }
}

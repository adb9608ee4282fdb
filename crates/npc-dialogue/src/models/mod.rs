mod conversation;

pub use conversation::{
    ActorRef, ConversationContext, ConversationId, ConversationRecord, ParticipantId, Role,
};

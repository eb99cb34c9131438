use super::{require_input, ViewError, ViewKind, ViewLifetime};
use crate::models::ChatMessage;
use crate::services::{ChatSession, ChatSessionFactory};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub const GREETING: &str = "Hello. I am the DentAI Intelligent Assistant. I can help with patient \
triage, complex procedure explanations, or administrative queries. How can I assist you?";

pub const CHAT_FAILED: &str = "System Error: Unable to connect to AI service.";

#[derive(Debug)]
struct Transcript {
    messages: Vec<ChatMessage>,
    thinking: bool,
}

/// Assistant chat. Holds one session for as long as it is mounted; the
/// transcript only ever grows.
pub struct ChatView {
    lifetime: ViewLifetime,
    session: ChatSession,
    transcript: Mutex<Transcript>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSnapshot {
    pub session_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub thinking: bool,
}

impl ChatView {
    pub fn mount(factory: &dyn ChatSessionFactory, lifetime: ViewLifetime) -> Self {
        debug_assert_eq!(lifetime.kind(), ViewKind::Assistant);
        let session = factory.create_chat_session();
        tracing::debug!(session_id = %session.id(), "Chat session created");

        Self {
            lifetime,
            session,
            transcript: Mutex::new(Transcript {
                messages: vec![ChatMessage::assistant(GREETING)],
                thinking: false,
            }),
        }
    }

    fn transcript(&self) -> MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send one user turn. Returns the assistant entry that was appended,
    /// which is the error entry when the call failed.
    pub async fn send(&self, text: &str) -> Result<ChatMessage, ViewError> {
        require_input("message", text)?;
        self.lifetime.ensure_active()?;

        {
            let mut transcript = self.transcript();
            if transcript.thinking {
                return Err(ViewError::Busy(ViewKind::Assistant));
            }
            transcript.messages.push(ChatMessage::user(text));
            transcript.thinking = true;
        }

        let outcome = self.lifetime.run(self.session.send_message(text)).await?;

        let reply = match outcome {
            Ok(reply) => ChatMessage::assistant(reply),
            Err(e) => {
                tracing::warn!(session_id = %self.session.id(), error = %e, "Chat turn failed");
                ChatMessage::assistant(CHAT_FAILED)
            }
        };

        let mut transcript = self.transcript();
        self.lifetime.ensure_active()?;
        transcript.messages.push(reply.clone());
        transcript.thinking = false;
        Ok(reply)
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let transcript = self.transcript();
        ChatSnapshot {
            session_id: self.session.id(),
            messages: transcript.messages.clone(),
            thinking: transcript.thinking,
        }
    }
}

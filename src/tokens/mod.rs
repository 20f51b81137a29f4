use log::{ debug, warn };
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use crate::models::chat::ChatMessage;

pub const TOKENS_PER_MESSAGE: usize = 4;
pub const TOKENS_PER_NAME: isize = -1;
pub const DEFAULT_ENCODING: &str = "cl100k_base";

#[derive(Clone)]
pub enum Tokenizer {
    Bpe {
        name: String,
        bpe: Arc<CoreBPE>,
    },
    Approximate,
}

impl Tokenizer {
    pub fn resolve(model: &str, fallback_encoding: &str) -> Self {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => {
                return Tokenizer::Bpe { name: model.to_string(), bpe: Arc::new(bpe) };
            }
            Err(e) => {
                warn!("No tokenizer for model '{}' ({}), using encoding '{}'", model, e, fallback_encoding);
            }
        }

        for name in [fallback_encoding, DEFAULT_ENCODING] {
            match Self::encoding(name) {
                Some(Ok(bpe)) => {
                    return Tokenizer::Bpe { name: name.to_string(), bpe: Arc::new(bpe) };
                }
                Some(Err(e)) => warn!("Failed to load encoding '{}': {}", name, e),
                None => warn!("Unknown encoding '{}'", name),
            }
        }

        warn!("Falling back to approximate token counting");
        Tokenizer::Approximate
    }

    fn encoding(name: &str) -> Option<Result<CoreBPE, String>> {
        let loaded = match name {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            _ => {
                return None;
            }
        };
        Some(loaded.map_err(|e| e.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            Tokenizer::Bpe { name, .. } => name,
            Tokenizer::Approximate => "approximate",
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            Tokenizer::Bpe { bpe, .. } => bpe.encode_with_special_tokens(text).len(),
            Tokenizer::Approximate => ((text.split_whitespace().count() as f32) * 1.3).ceil() as usize,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContextWindow {
    pub messages: Vec<ChatMessage>,
    pub token_count: usize,
}

#[derive(Clone)]
pub struct TokenBudgeter {
    tokenizer: Tokenizer,
    max_tokens: usize,
}

impl TokenBudgeter {
    pub fn new(tokenizer: Tokenizer, max_tokens: usize) -> Self {
        Self { tokenizer, max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn message_cost(&self, message: &ChatMessage) -> usize {
        let mut cost = (TOKENS_PER_MESSAGE as isize)
            + (self.tokenizer.count(message.role.as_str()) as isize)
            + (self.tokenizer.count(&message.content) as isize);
        if let Some(name) = &message.name {
            cost += (self.tokenizer.count(name) as isize) + TOKENS_PER_NAME;
        }
        if let Some(call) = &message.function_call {
            cost += (self.tokenizer.count(&call.name) + self.tokenizer.count(&call.arguments)) as isize;
        }
        cost.max(0) as usize
    }

    // Oldest-first prefix; the system message is kept even when it alone is over budget.
    pub fn build_window(&self, system_prompt: &str, history: Vec<ChatMessage>) -> ContextWindow {
        let system = ChatMessage::system(system_prompt);
        let mut token_count = self.message_cost(&system);
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(system);

        let total = history.len();
        for message in history {
            let cost = self.message_cost(&message);
            if token_count + cost > self.max_tokens {
                break;
            }
            token_count += cost;
            messages.push(message);
        }

        debug!(
            "Context window: {}/{} turns, {} of {} tokens ({})",
            messages.len() - 1,
            total,
            token_count,
            self.max_tokens,
            self.tokenizer.name()
        );
        ContextWindow { messages, token_count }
    }
}

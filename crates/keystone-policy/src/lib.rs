//! Keystone-style policy engine.
//!
//! Compiles named boolean rules written in the Keystone policy language
//! (`role:admin or (user_id:%(target.user.id)s and not project_id:null)`) and decides
//! whether an action is allowed for a token's identity and the call's parameters.
//!
//! Rules are compiled once when the engine is built. A check is a pure function of the
//! compiled rules, the session's identity facts and the call parameters.
//!
//! ```ignore
//! use keystone_policy::prelude::*;
//! use serde_json::json;
//!
//! let engine = PolicyEngine::from_file("policy.yaml", EngineOptions::default())?;
//! let session = engine.policy(&token, SessionOptions::default())?;
//! if session.check("identity:get_user", &json!({"target": {"user": {"id": "u1"}}}))? {
//!     // allowed
//! }
//! ```

pub mod ast;
pub mod coerce;
pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod hash;
pub mod lexer;
pub mod loader;
pub mod observer;
pub mod parser;

pub use ast::{CompiledRule, Node};
pub use context::{IdentityContext, TokenPayload};
pub use decision::TracedDecision;
pub use engine::{
    EngineOptions, ParameterReport, PolicyConfig, PolicyEngine, PolicySession, RuleMetadata,
    RulesSummary, SessionOptions, DEFAULT_RULE,
};
pub use error::{PolicyError, Result};
pub use evaluator::{evaluate, EvaluationContext, RuleResolver, UrlCheck};
pub use lexer::{tokenize, Token, TokenKind};
pub use parser::{parse, ParseError};

/// Version of the policy engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::context::IdentityContext;
    pub use crate::engine::{EngineOptions, PolicyConfig, PolicyEngine, PolicySession, SessionOptions};
    pub use crate::error::{PolicyError, Result};
    pub use crate::evaluator::{RuleResolver, UrlCheck};
    pub use crate::observer::{DebugTrace, EvaluationObserver, TraceSink};
}

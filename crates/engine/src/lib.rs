//! Session engine for Hyperstore
//!
//! This crate turns the storage and concurrency layers into a transactional
//! graph store:
//! - Store / StoreBuilder: lifecycle owner and configuration
//! - Session: nested, thread-bound unit of work
//! - SessionRegistry: session indices and thread binding
//! - Domains and commands: how changes reach the graph
//! - Constraint checks run in parallel when a session completes
//! - Notifiers and transaction scopes observe and settle sessions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod config;
pub mod constraints;
pub mod context;
pub mod domain;
pub mod memory;
pub mod notify;
pub mod registry;
pub mod scope;
pub mod session;
pub mod store;
pub mod tracking;

pub use command::{DomainCommand, GraphCommand};
pub use config::{SessionConfiguration, StoreConfig, DEFAULT_MAX_SESSIONS};
pub use constraints::{ConstraintManager, ImplicitConstraints};
pub use context::{CompletingCallback, SessionDataContext, SessionLocalInfo};
pub use domain::{DomainKind, DomainModel, DomainRegistry};
pub use memory::{MemoryDomain, MemoryTransaction};
pub use notify::{EventNotifier, SessionInformation};
pub use registry::{SessionRegistry, SharedContext};
pub use scope::{DefaultScopeFactory, EnlistedTransactionScope, Enlistment, ScopeFactory, TransactionScope};
pub use session::{BorrowedSession, Session, SessionHandle, SessionResult, TrackerGuard};
pub use store::{Store, StoreBuilder, StoreMetrics};
pub use tracking::{SessionTrackingData, TrackedElement, TrackingState};

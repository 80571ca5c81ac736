//! Operations
//!
//! Orchestration behind every exposed operation. Services share one
//! [`Store`](crate::store::Store) and one
//! [`ActiveConnection`](crate::session::ActiveConnection); neither the CLI nor
//! the RPC server touches them directly.
//!
//! | service | operations |
//! |---|---|
//! | [`ConnectionService`] | `connections.{fetch,create,select,update,delete,disconnect,switch,verify,status}` |
//! | [`ProcedureService`] | `procedures.{listProcedures,listDatabases,fetchContent,getProcedureParameters}` |
//! | [`ExecutionService`] | `executions.{checkPassFail,rerunRuleGroup,list,load,delete}` |

mod connections;
mod executions;
mod procedures;

pub use connections::{ConnectionService, ConnectionUpdate};
pub use executions::{ExecutionRecord, ExecutionService};
pub use procedures::ProcedureService;

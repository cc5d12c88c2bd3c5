//! Semantic request handling for one connection.
//!
//! The gateway decodes each frame into a [`Request`], routes it to the
//! connection's database, and turns the outcome into a [`Response`]. Every
//! failure at this level is answered with a failure response so that one bad
//! request never ends the session.

mod errors;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::database::Database;
use crate::error_context::ErrorContext;
use crate::protocol::{
    Db, DbRef, Frame, Open, Prepare, Request, Response, ServerAddress, Servers, SqlCall,
    StatementCall, StatementRef, Stmt, Welcome,
};
use crate::registry::Registry;
use crate::replication::{Cluster, ReplicationRegistry};

pub use self::errors::GatewayError;

const GATEWAY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::gateway");

/// Server-wide collaborators shared by every gateway.
#[derive(Clone)]
pub struct GatewayContext {
    replication: ReplicationRegistry,
    cluster: Arc<dyn Cluster>,
    heartbeat_timeout: Duration,
}

impl GatewayContext {
    /// Bundles the replication backends, cluster view, and heartbeat
    /// timeout advertised to clients.
    pub fn new(
        replication: ReplicationRegistry,
        cluster: Arc<dyn Cluster>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            replication,
            cluster,
            heartbeat_timeout,
        }
    }

    /// Heartbeat timeout advertised to clients.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("GatewayContext")
            .field("replication", &self.replication)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .finish_non_exhaustive()
    }
}

/// Per-connection request dispatcher owning at most one database.
#[derive(Debug)]
pub struct Gateway {
    context: Arc<GatewayContext>,
    databases: Registry<Database>,
    client_id: Option<u64>,
    error: ErrorContext,
}

impl Gateway {
    /// Creates a gateway with no open database.
    #[must_use]
    pub fn new(context: Arc<GatewayContext>) -> Self {
        Self {
            context,
            databases: Registry::new(),
            client_id: None,
            error: ErrorContext::new(),
        }
    }

    /// Handles one frame, always producing a response.
    pub fn handle(&mut self, frame: Frame<'_>) -> Response {
        let outcome = Request::decode(frame.kind, frame.payload)
            .map_err(GatewayError::from)
            .and_then(|request| self.dispatch(request));
        match outcome {
            Ok(response) => {
                self.error.clear();
                response
            }
            Err(error) => {
                debug!(
                    target: GATEWAY_TARGET,
                    kind = frame.kind,
                    code = error.code(),
                    error = %error,
                    "request failed"
                );
                self.error.record(&error);
                Response::failure(error.code(), error.to_string())
            }
        }
    }

    /// Routes a decoded request.
    ///
    /// # Errors
    ///
    /// Returns the request-level failure to report to the client.
    pub fn dispatch(&mut self, request: Request) -> Result<Response, GatewayError> {
        trace!(target: GATEWAY_TARGET, kind = %request.kind(), "dispatching request");
        match request {
            Request::Leader => Ok(Response::Server(ServerAddress {
                address: self.context.cluster.leader(),
            })),
            Request::Client(client) => {
                self.client_id = Some(client.id);
                Ok(Response::Welcome(Welcome {
                    heartbeat_timeout_ms: duration_millis(self.context.heartbeat_timeout),
                }))
            }
            Request::Heartbeat(_) => Ok(Response::Servers(Servers {
                servers: self.context.cluster.servers(),
            })),
            Request::Open(open) => self.open(&open),
            Request::Prepare(prepare) => self.prepare(&prepare),
            Request::Exec(call) => self.exec(&call),
            Request::Query(call) => self.query(&call),
            Request::Finalize(target) => self.finalize(target),
            Request::ExecSql(call) => self.exec_sql(&call),
            Request::QuerySql(call) => self.query_sql(&call),
            Request::Begin(DbRef { db_id }) => {
                self.database(db_id)?.begin()?;
                Ok(Response::Empty)
            }
            Request::Commit(DbRef { db_id }) => {
                self.database(db_id)?.commit()?;
                Ok(Response::Empty)
            }
            Request::Rollback(DbRef { db_id }) => {
                self.database(db_id)?.rollback()?;
                Ok(Response::Empty)
            }
        }
    }

    /// Client ID registered by the last `client` request.
    #[must_use]
    pub fn client_id(&self) -> Option<u64> {
        self.client_id
    }

    /// Last request failure on this connection, cleared by a success.
    #[must_use]
    pub fn error(&self) -> &ErrorContext {
        &self.error
    }

    /// Looks up an open database.
    #[must_use]
    pub fn database_by_id(&self, id: u32) -> Option<&Database> {
        self.databases.get(id)
    }

    fn database(&mut self, id: u32) -> Result<&mut Database, GatewayError> {
        self.databases
            .get_mut(id)
            .ok_or(GatewayError::DatabaseNotFound { id })
    }

    fn open(&mut self, open: &Open) -> Result<Response, GatewayError> {
        if !self.databases.is_empty() {
            return Err(GatewayError::AlreadyOpen);
        }
        let database = Database::open(
            &self.context.replication,
            &open.name,
            open.flags,
            &open.replication,
        )?;
        let (id, _) = self.databases.add(move |_| database)?;
        debug!(
            target: GATEWAY_TARGET,
            db_id = id,
            database = %open.name,
            replication = %open.replication,
            "database opened for client"
        );
        Ok(Response::Db(Db { id }))
    }

    fn prepare(&mut self, prepare: &Prepare) -> Result<Response, GatewayError> {
        let prepared = self.database(prepare.db_id)?.prepare(&prepare.sql)?;
        Ok(Response::Stmt(Stmt {
            db_id: prepare.db_id,
            id: prepared.id,
            params: prepared.params,
            columns: prepared.columns,
            tail: prepared.tail,
        }))
    }

    fn exec(&mut self, call: &StatementCall) -> Result<Response, GatewayError> {
        let result = self.database(call.db_id)?.exec(call.stmt_id, &call.params)?;
        Ok(Response::Result(result))
    }

    fn query(&mut self, call: &StatementCall) -> Result<Response, GatewayError> {
        let rows = self.database(call.db_id)?.query(call.stmt_id, &call.params)?;
        Ok(Response::Rows(rows))
    }

    fn finalize(&mut self, target: StatementRef) -> Result<Response, GatewayError> {
        self.database(target.db_id)?.finalize(target.stmt_id)?;
        Ok(Response::Empty)
    }

    fn exec_sql(&mut self, call: &SqlCall) -> Result<Response, GatewayError> {
        let result = self.database(call.db_id)?.exec_sql(&call.sql, &call.params)?;
        Ok(Response::Result(result))
    }

    fn query_sql(&mut self, call: &SqlCall) -> Result<Response, GatewayError> {
        let rows = self
            .database(call.db_id)?
            .query_sql(&call.sql, &call.params)?;
        Ok(Response::Rows(rows))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

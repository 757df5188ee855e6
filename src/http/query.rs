/*!
 * HttpQuery: the capability set a runner worker executes.
 */

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// One unit of work the runner can execute against a peer. Implementors
/// carry whatever state they need to build a body and interpret an
/// answer; results are typically handed back to the caller through a
/// shared `Arc<Mutex<_>>`/`Arc<Atomic*>` captured at construction time,
/// since queries are submitted as trait objects and the queue does not
/// hand them back individually.
pub trait HttpQuery: Send {
    fn method(&self) -> Method;

    fn peer(&self) -> &str;

    /// Path (and query string) relative to the peer's base URL.
    fn uri(&self) -> String;

    fn headers(&self) -> Vec<(String, String)>;

    /// `None` for GET/DELETE; `Some(bytes)` for POST/PUT bodies.
    fn read_body(&self) -> Option<Vec<u8>>;

    /// Invoked synchronously on the worker thread after a 2xx answer.
    /// Returning `Err` fails the query even though the HTTP layer itself
    /// succeeded (a malformed body where the caller actually needs to
    /// parse it, e.g. lookup/create-transaction answers).
    fn handle_answer(
        &mut self,
        status: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<()>;

    /// Best-effort queries never fail the shared queue: a transport
    /// failure (unreachable peer, non-2xx, unknown peer) just counts as
    /// a normal completion instead of flipping the queue to `Failure`.
    /// Peer-detection probes set this so one dead peer doesn't abandon
    /// the rest of the sweep; jobs leave the default `false` so a
    /// genuine bucket-transfer failure still fails the job.
    fn best_effort(&self) -> bool {
        false
    }
}

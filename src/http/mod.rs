/*!
 * The HTTP Query Queue + Runner (§4.3): a bounded FIFO of `HttpQuery`
 * trait objects executed by a small pool of worker threads, with retry,
 * backoff, session-cookie pinning, and throughput reporting.
 */

pub mod query;
pub mod queue;
pub mod runner;
pub mod speed;

pub use query::{HttpQuery, Method, QueryStatus};
pub use queue::{HttpQueryQueue, QueueStatus};
pub use runner::HttpQueriesRunner;
pub use speed::SpeedEstimator;

//! Hybrid Logical Clock.
//!
//! Timestamps combine wall-clock milliseconds with a logical counter and a
//! node ID, giving a total order that respects causality across nodes
//! without synchronized clocks.
//!
//! ```text
//! 1700000000123:00004:abc12345
//! └─ physical ─┘└ctr┘ └ node ┘
//! ```

mod clock;
mod node_id;
mod timestamp;

pub use clock::{HybridLogicalClock, ManualClock, PhysicalClock, SystemClock};
pub use node_id::{NodeId, NODE_ID_LEN};
pub use timestamp::{HlcParseError, HlcTimestamp, MAX_COUNTER};

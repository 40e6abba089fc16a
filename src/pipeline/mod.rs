pub mod fps;
pub mod triple_buffer;
pub mod work_queue;

pub use triple_buffer::{SharedTripleBuffer, TripleBuffer};
pub use work_queue::WorkQueue;

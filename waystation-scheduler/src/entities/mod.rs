pub mod dest_queue;
pub mod entry;
pub mod job;
pub mod message;
pub mod peer;
pub mod transport;

pub use dest_queue::DestQueue;
pub use entry::{Entry, EntryList};
pub use job::Job;
pub use message::Message;
pub use peer::Peer;
pub use transport::Transport;

pub mod client;
pub mod fanout;
pub mod group;
pub mod service;
pub mod store;

pub mod proto {
    tonic::include_proto!("agent");
}

pub use group::AgentGroup;
pub use store::PeerStore;

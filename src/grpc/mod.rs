//! Generated gRPC wire types.

mod afrouter {
    tonic::include_proto!("afrouter");
}

mod vcore {
    tonic::include_proto!("vcore");
}

mod events {
    tonic::include_proto!("events");
}

pub use afrouter::configuration_client::ConfigurationClient;
pub use afrouter::{Affinity, Conn};
pub use events::{DeviceDiscovered, Envelope};
pub use vcore::vcore_service_client::VcoreServiceClient;
pub use vcore::{DeviceId, DeviceIds, Empty};

#[cfg(test)]
pub use events::Header;

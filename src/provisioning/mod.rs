//! Hardware address to device identity resolution

pub mod resolver;

pub use resolver::{
    parse_lookup_response, ProvisioningError, ProvisioningResolver, ResolverConfig, LOOKUP_PATH,
};

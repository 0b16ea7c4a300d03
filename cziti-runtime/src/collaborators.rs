//! Interfaces of the interception collaborators driven by the reconciler.
//!
//! Both are invoked on the loop thread only.

use std::net::IpAddr;

use cziti_core::{ConnectionHandle, RegistrationError, ServiceId};

use crate::context::IdentityContext;

/// Hands out local intercept addresses for service hostnames.
pub trait DnsRegistrar: Send + Sync {
    fn register_service(
        &self,
        service_id: &ServiceId,
        host: &str,
        port: u16,
        context: &IdentityContext,
        name: &str,
    ) -> Result<IpAddr, RegistrationError>;

    fn deregister_service(&self, context: &IdentityContext, name: &str);
}

/// A tunnel device that redirects intercepted traffic into a session.
pub trait TunnelDevice: Send + Sync {
    fn add_intercept(
        &self,
        service_id: &ServiceId,
        name: &str,
        ip: IpAddr,
        port: u16,
        connection: ConnectionHandle,
    );
}

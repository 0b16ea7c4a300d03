//! Turns service-state callbacks into service table changes, intercept
//! registrations and published events.
//!
//! Runs on the loop thread. Every failure here ends up as a log line or a
//! record flag; nothing propagates back into the engine.

use std::sync::Arc;

use cziti_core::{
    ChangeOperation, ServiceRecord, ServiceStatus, TunnelConfig, TUNNELER_CONFIG_TYPE,
};

use crate::collaborators::{DnsRegistrar, TunnelDevice};
use crate::context::IdentityContext;
use crate::engine::ServiceDescriptor;
use crate::events::{EventChannel, ServiceChangeEvent};

pub struct Reconciler {
    dns: Arc<dyn DnsRegistrar>,
    devices: Vec<Arc<dyn TunnelDevice>>,
    events: Arc<EventChannel>,
}

impl Reconciler {
    pub fn new(
        dns: Arc<dyn DnsRegistrar>,
        devices: Vec<Arc<dyn TunnelDevice>>,
        events: Arc<EventChannel>,
    ) -> Self {
        Self {
            dns,
            devices,
            events,
        }
    }

    /// Apply one service callback. Returns the change that was published, if any.
    pub fn apply(
        &self,
        context: &Arc<IdentityContext>,
        service: ServiceDescriptor,
        status: ServiceStatus,
    ) -> Option<ChangeOperation> {
        tracing::debug!(
            token = %context.token(),
            service = %service.name,
            service_id = %service.id,
            status = ?status,
            "service callback",
        );
        match status {
            ServiceStatus::Unavailable => self.remove(context, &service),
            ServiceStatus::Available => self.add(context, service),
            ServiceStatus::Other(code) => {
                tracing::debug!(code, service_id = %service.id, "ignoring service status");
                None
            }
        }
    }

    fn remove(
        &self,
        context: &Arc<IdentityContext>,
        service: &ServiceDescriptor,
    ) -> Option<ChangeOperation> {
        let Some(record) = context.service(&service.id) else {
            tracing::warn!(
                service_id = %service.id,
                service = %service.name,
                "could not find a service with this id; ignoring stale removal",
            );
            return None;
        };

        self.dns.deregister_service(context, &record.name);
        context.remove_service(&record.id);
        tracing::info!(
            service = %record.name,
            service_id = %record.id,
            "service intercept removed",
        );
        self.publish(context, ChangeOperation::Removed, record);
        Some(ChangeOperation::Removed)
    }

    fn add(
        &self,
        context: &Arc<IdentityContext>,
        service: ServiceDescriptor,
    ) -> Option<ChangeOperation> {
        let Some(connection) = context.connection_handle() else {
            tracing::warn!(
                token = %context.token(),
                service_id = %service.id,
                "service callback before init completed; ignoring",
            );
            return None;
        };

        let config = match TunnelConfig::from_raw(service.raw_config(TUNNELER_CONFIG_TYPE)) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(
                    service = %service.name,
                    error = %err,
                    "service is not enabled for tunneling",
                );
                return None;
            }
        };

        let registered = self.dns.register_service(
            &service.id,
            &config.hostname,
            config.port,
            context,
            &service.name,
        );
        let (assigned_ip, owns_intercept) = match registered {
            Ok(ip) => {
                tracing::info!(
                    service = %service.name,
                    host = %config.hostname,
                    port = config.port,
                    ip = %ip,
                    "service intercept beginning",
                );
                for device in &self.devices {
                    device.add_intercept(&service.id, &service.name, ip, config.port, connection);
                }
                (Some(ip), true)
            }
            Err(err) => {
                tracing::warn!(
                    service = %service.name,
                    host = %config.hostname,
                    error = %err,
                    "dns registration failed; service recorded without a local intercept",
                );
                (None, false)
            }
        };

        let record = ServiceRecord {
            name: service.name,
            id: service.id,
            intercept_host: config.hostname,
            intercept_port: config.port,
            assigned_ip,
            owns_intercept,
        };
        context.store_service(record.clone());
        self.publish(context, ChangeOperation::Added, record);
        Some(ChangeOperation::Added)
    }

    fn publish(
        &self,
        context: &Arc<IdentityContext>,
        operation: ChangeOperation,
        service: ServiceRecord,
    ) {
        self.events.publish(ServiceChangeEvent {
            operation,
            service,
            context: Arc::clone(context),
        });
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

//! Display resource discovery
//!
//! Picks the first connected connector, its first advertised mode, and the
//! encoder and CRTC currently driving it. No EDID ranking is done: the kernel
//! lists the preferred mode first.

use tracing::{debug, info};

use crate::drm_device::{
    ConnectionState, ConnectorId, ConnectorInfo, CrtcId, CrtcInfo, EncoderId, KmsDevice, ModeInfo,
};
use crate::error::DiscoveryError;

/// The output configuration every presentation call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub connector: ConnectorId,
    pub encoder: EncoderId,
    pub crtc: CrtcId,
    /// Always one of the connector's advertised modes
    pub mode: ModeInfo,
}

/// Result of discovery: the binding plus the CRTC state found before we took
/// it over, for restoring on shutdown.
#[derive(Debug, Clone)]
pub struct LocatedOutput {
    pub binding: OutputBinding,
    pub saved_crtc: CrtcInfo,
}

/// Find the first connected connector.
///
/// Connectors that cannot be queried are skipped.
pub fn find_connector<D: KmsDevice>(
    device: &D,
    connectors: &[ConnectorId],
) -> Option<ConnectorInfo> {
    connectors.iter().find_map(|&id| match device.connector(id) {
        Ok(info) if info.state == ConnectionState::Connected => Some(info),
        Ok(info) => {
            debug!(connector = %id, name = %info.name, state = ?info.state, "Skipping connector");
            None
        }
        Err(e) => {
            debug!(connector = %id, "Failed to query connector: {}", e);
            None
        }
    })
}

pub fn locate_output<D: KmsDevice>(device: &D) -> Result<LocatedOutput, DiscoveryError> {
    let resources = device
        .resources()
        .map_err(DiscoveryError::ResourcesUnavailable)?;
    debug!(
        connectors = resources.connectors.len(),
        encoders = resources.encoders.len(),
        crtcs = resources.crtcs.len(),
        "Enumerated DRM resources"
    );

    let connector =
        find_connector(device, &resources.connectors).ok_or(DiscoveryError::NoConnectorFound)?;
    // The resource snapshot is not needed past this point.
    drop(resources);

    let mode = connector
        .modes
        .first()
        .cloned()
        .ok_or(DiscoveryError::NoModeFound(connector.id))?;
    info!(connector = %connector.id, name = %connector.name, %mode, "DRM resolution");

    let encoder_id = connector
        .encoder
        .ok_or(DiscoveryError::NoEncoderFound(connector.id))?;
    let encoder = device.encoder(encoder_id).map_err(|e| {
        debug!(encoder = %encoder_id, "Failed to query encoder: {}", e);
        DiscoveryError::NoEncoderFound(connector.id)
    })?;

    let crtc_id = encoder.crtc.ok_or(DiscoveryError::NoCrtcFound(encoder.id))?;
    let saved_crtc = device.crtc(crtc_id).map_err(|e| {
        debug!(crtc = %crtc_id, "Failed to query CRTC: {}", e);
        DiscoveryError::NoCrtcFound(encoder.id)
    })?;

    info!(
        connector = %connector.id,
        encoder = %encoder.id,
        crtc = %saved_crtc.id,
        "Located output"
    );

    Ok(LocatedOutput {
        binding: OutputBinding {
            connector: connector.id,
            encoder: encoder.id,
            crtc: saved_crtc.id,
            mode,
        },
        saved_crtc,
    })
}

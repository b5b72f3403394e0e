// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DVB-MABR multicast gateway configuration (TS 103 769).
//!
//! Maps media representations onto multicast transport sessions; the
//! configuration itself is delivered as a file on the bootstrap session.

use std::net::{Ipv4Addr, SocketAddrV4};

use roxmltree::Node;

use super::xml;
use crate::error::{Error, Result};
use crate::topology::{ChannelDecl, RepresentationRef, SessionDecl};

/// One transport session endpoint carrying a representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEndpoint {
    pub endpoint: SocketAddrV4,
    pub tsi: u32,
    pub representation: Option<RepresentationRef>,
}

/// A `MulticastSession` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MulticastSession {
    pub service_identifier: Option<String>,
    pub manifest_locator: Option<String>,
    pub manifest_content_type: Option<String>,
    pub transports: Vec<TransportEndpoint>,
}

/// Decoded gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfig {
    pub sessions: Vec<MulticastSession>,
}

impl GatewayConfig {
    /// First announced manifest URL.
    pub fn manifest_locator(&self) -> Option<&str> {
        self.sessions
            .iter()
            .find_map(|s| s.manifest_locator.as_deref())
    }

    /// Session declarations, grouped by destination.
    ///
    /// Destinations equal to `service_endpoint` share the service socket.
    pub fn session_decls(&self, service_endpoint: SocketAddrV4) -> Vec<SessionDecl> {
        let mut out: Vec<SessionDecl> = Vec::new();
        for transport in self.sessions.iter().flat_map(|s| s.transports.iter()) {
            let endpoint = (transport.endpoint != service_endpoint).then_some(transport.endpoint);
            let mut channel = ChannelDecl::new(transport.tsi);
            channel.representation = transport.representation.clone();

            let session = match out.iter().position(|s| s.endpoint == endpoint) {
                Some(i) => &mut out[i],
                None => {
                    out.push(SessionDecl::new(endpoint));
                    let last = out.len() - 1;
                    &mut out[last]
                }
            };
            if session.channels.iter().any(|c| c.tsi == channel.tsi) {
                log::warn!(
                    "[MABR] TSI {} declared twice on {}, keeping first",
                    channel.tsi,
                    transport.endpoint
                );
                continue;
            }
            session.channels.push(channel);
        }
        out
    }
}

fn parse_representation(node: Node<'_, '_>) -> Option<RepresentationRef> {
    let representation = xml::child_text(node, "RepresentationIdentifier")?;
    Some(RepresentationRef {
        period: xml::child_text(node, "PeriodIdentifier").map(str::to_string),
        adaptation_set: xml::child_text(node, "AdaptationSetIdentifier").map(str::to_string),
        representation: representation.to_string(),
    })
}

fn parse_endpoint(node: Node<'_, '_>) -> Result<(SocketAddrV4, u32)> {
    let group = xml::child_text(node, "NetworkDestinationGroupAddress")
        .ok_or_else(|| Error::signaling("EndpointAddress without destination group"))?;
    let ip = group
        .parse::<Ipv4Addr>()
        .map_err(|_| Error::signaling(format!("invalid destination group {:?}", group)))?;
    let port = xml::child_text(node, "TransportDestinationPort")
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::signaling(format!("EndpointAddress {} without port", ip)))?;
    let tsi = xml::child_text(node, "MediaTransportSessionIdentifier")
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| {
            Error::signaling(format!("EndpointAddress {}:{} without session identifier", ip, port))
        })?;
    Ok((SocketAddrV4::new(ip, port), tsi))
}

pub fn parse_gateway_config(text: &str) -> Result<GatewayConfig> {
    let doc = xml::parse(text)?;
    let root = doc.root_element();
    if !root.tag_name().name().starts_with("MulticastGatewayConfiguration") {
        return Err(Error::signaling(format!(
            "expected MulticastGatewayConfiguration root, found {}",
            root.tag_name().name()
        )));
    }

    let mut config = GatewayConfig::default();
    for ms in xml::children(root, "MulticastSession") {
        let mut session = MulticastSession {
            service_identifier: xml::attr(ms, "serviceIdentifier").map(str::to_string),
            ..Default::default()
        };
        if let Some(locator) = xml::child(ms, "PresentationManifestLocator") {
            session.manifest_locator = xml::text(locator).map(str::to_string);
            session.manifest_content_type = xml::attr(locator, "contentType").map(str::to_string);
        }

        for mts in xml::children(ms, "MulticastTransportSession") {
            let representation =
                xml::child(mts, "ServiceComponentIdentifier").and_then(parse_representation);
            for ep in xml::children(mts, "EndpointAddress") {
                let (endpoint, tsi) = parse_endpoint(ep)?;
                session.transports.push(TransportEndpoint {
                    endpoint,
                    tsi,
                    representation: representation.clone(),
                });
            }
        }
        config.sessions.push(session);
    }

    if config.sessions.iter().all(|s| s.transports.is_empty()) {
        return Err(Error::signaling("gateway configuration declares no transport session"));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_xml(video_port: u16) -> String {
        format!(
            r#"<MulticastGatewayConfiguration xmlns="urn:dvb:metadata:MulticastSession:2019"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <MulticastSession serviceIdentifier="urn:svc:news">
    <PresentationManifestLocator contentType="application/dash+xml">http://cdn/news/manifest.mpd</PresentationManifestLocator>
    <MulticastTransportSession>
      <EndpointAddress>
        <NetworkDestinationGroupAddress>239.1.1.1</NetworkDestinationGroupAddress>
        <TransportDestinationPort>{}</TransportDestinationPort>
        <MediaTransportSessionIdentifier>10</MediaTransportSessionIdentifier>
      </EndpointAddress>
      <ServiceComponentIdentifier xsi:type="DASHComponentIdentifierType">
        <PeriodIdentifier>p0</PeriodIdentifier>
        <AdaptationSetIdentifier>0</AdaptationSetIdentifier>
        <RepresentationIdentifier>v1080</RepresentationIdentifier>
      </ServiceComponentIdentifier>
    </MulticastTransportSession>
    <MulticastTransportSession>
      <EndpointAddress>
        <NetworkDestinationGroupAddress>239.1.1.1</NetworkDestinationGroupAddress>
        <TransportDestinationPort>6000</TransportDestinationPort>
        <MediaTransportSessionIdentifier>11</MediaTransportSessionIdentifier>
      </EndpointAddress>
      <ServiceComponentIdentifier xsi:type="DASHComponentIdentifierType">
        <PeriodIdentifier>p0</PeriodIdentifier>
        <AdaptationSetIdentifier>0</AdaptationSetIdentifier>
        <RepresentationIdentifier>v720</RepresentationIdentifier>
      </ServiceComponentIdentifier>
    </MulticastTransportSession>
  </MulticastSession>
</MulticastGatewayConfiguration>"#,
            video_port
        )
    }

    #[test]
    fn test_parse_gateway() {
        let cfg = parse_gateway_config(&config_xml(5000)).unwrap();
        assert_eq!(cfg.manifest_locator(), Some("http://cdn/news/manifest.mpd"));
        assert_eq!(cfg.sessions[0].transports.len(), 2);
        let t = &cfg.sessions[0].transports[0];
        assert_eq!(t.tsi, 10);
        assert_eq!(t.endpoint, "239.1.1.1:5000".parse().unwrap());
        assert_eq!(t.representation.as_ref().unwrap().representation, "v1080");
    }

    #[test]
    fn test_session_grouping() {
        let service: SocketAddrV4 = "239.1.1.1:4000".parse().unwrap();
        let decls = parse_gateway_config(&config_xml(6000))
            .unwrap()
            .session_decls(service);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].channels.len(), 2);

        let decls = parse_gateway_config(&config_xml(4000))
            .unwrap()
            .session_decls(service);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].endpoint, None);
    }

    #[test]
    fn test_invalid() {
        assert!(parse_gateway_config("<Other/>").is_err());
        assert!(parse_gateway_config("<MulticastGatewayConfiguration/>").is_err());
        let missing_port = "<MulticastGatewayConfiguration><MulticastSession><MulticastTransportSession><EndpointAddress><NetworkDestinationGroupAddress>239.0.0.1</NetworkDestinationGroupAddress><MediaTransportSessionIdentifier>1</MediaTransportSessionIdentifier></EndpointAddress></MulticastTransportSession></MulticastSession></MulticastGatewayConfiguration>";
        assert!(parse_gateway_config(missing_port).is_err());
    }
}

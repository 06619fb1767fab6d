//! DNS server subsystem.
//!
//! A small authoritative front end built on
//! [hickory-dns](https://crates.io/crates/hickory-server). Queries are
//! answered as follows:
//!
//! * **Names under the root domain**: the suffix is stripped and the rest
//!   is looked up through the [`QueryAdapter`].  A hit yields one A or AAAA
//!   record; a miss yields `NXDOMAIN`.
//! * **Anything else**: `REFUSED`.  We do not recurse.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::rdata::{A, AAAA};
use hickory_server::proto::rr::{RData, Record, RecordType};
use hickory_server::server::{
    Request, RequestHandler, ResponseHandler, ResponseInfo, ServerFuture,
};
use log::{debug, error, info};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::time::Duration;

use crate::query::QueryAdapter;

/// Timeout for idle TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// Start the DNS server.
pub async fn run_dns_server(
    bind_addr: SocketAddr,
    root_domain: String,
    ttl: u32,
    adapter: QueryAdapter,
) -> anyhow::Result<()> {
    info!("DNS server starting on {} for zone {:?}", bind_addr, root_domain);

    let handler = DocknameDns {
        adapter,
        root_domain,
        ttl,
    };
    let mut server = ServerFuture::new(handler);

    // Register UDP listener.
    let udp = UdpSocket::bind(bind_addr).await?;
    server.register_socket(udp);

    // Register TCP listener.
    let tcp = TcpListener::bind(bind_addr).await?;
    server.register_listener(tcp, TCP_TIMEOUT);

    // Run the server until future resolves.
    server.block_until_done().await?;
    Ok(())
}

/// Run the DNS server. If it stops with an error (typically a failed
/// bind), shutdown is requested before the error is returned.
pub async fn serve_or_shutdown(
    bind_addr: SocketAddr,
    root_domain: String,
    ttl: u32,
    adapter: QueryAdapter,
    shutdown: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let result = run_dns_server(bind_addr, root_domain, ttl, adapter).await;
    if let Err(e) = &result {
        error!("DNS server failed: {}. Shutting down.", e);
        let _ = shutdown.send(true);
    }
    result
}

/// How a query should be answered.
#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Address(IpAddr),
    NoData,
    NxDomain,
    Refused,
}

/// Hostname part of `qname` if it lies under `root_domain`. An empty root
/// domain serves bare names. `Some("")` is the zone apex.
fn hostname_in_zone<'a>(qname: &'a str, root_domain: &str) -> Option<&'a str> {
    if root_domain.is_empty() {
        return Some(qname);
    }
    if qname == root_domain {
        return Some("");
    }
    qname
        .strip_suffix(root_domain)
        .and_then(|rest| rest.strip_suffix('.'))
}

fn plan_answer(found: Option<IpAddr>, qtype: RecordType) -> Answer {
    match found {
        None => Answer::NxDomain,
        Some(addr @ IpAddr::V4(_)) if matches!(qtype, RecordType::A | RecordType::ANY) => {
            Answer::Address(addr)
        }
        Some(addr @ IpAddr::V6(_)) if matches!(qtype, RecordType::AAAA | RecordType::ANY) => {
            Answer::Address(addr)
        }
        Some(_) => Answer::NoData,
    }
}

struct DocknameDns {
    adapter: QueryAdapter,
    root_domain: String,
    ttl: u32,
}

impl DocknameDns {
    fn plan(&self, qname: &str, qtype: RecordType) -> Answer {
        match hostname_in_zone(qname, &self.root_domain) {
            None => Answer::Refused,
            Some("") => Answer::NoData,
            Some(hostname) => plan_answer(self.adapter.answer(hostname), qtype),
        }
    }
}

#[async_trait]
impl RequestHandler for DocknameDns {
    async fn handle_request<R>(&self, request: &Request, response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let qname = query
            .name()
            .to_string()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let qtype = query.query_type();

        // Build response header
        let mut header = Header::response_from_request(request.header());

        let answer = self.plan(&qname, qtype);
        debug!("{} {:?} -> {:?}", qname, qtype, answer);

        let mut records = Vec::new();
        match answer {
            Answer::Address(addr) => {
                header.set_authoritative(true);
                let rdata = match addr {
                    IpAddr::V4(ipv4) => RData::A(A(ipv4)),
                    IpAddr::V6(ipv6) => RData::AAAA(AAAA(ipv6)),
                };
                records.push(Record::from_rdata(
                    query.name().clone().into(),
                    self.ttl,
                    rdata,
                ));
            }
            Answer::NoData => {
                header.set_authoritative(true);
                header.set_response_code(ResponseCode::NoError);
            }
            Answer::NxDomain => {
                header.set_authoritative(true);
                header.set_response_code(ResponseCode::NXDomain);
            }
            Answer::Refused => {
                header.set_response_code(ResponseCode::Refused);
            }
        }

        send(request, response_handle, header, &records).await
    }
}

async fn send<R>(
    request: &Request,
    mut response_handle: R,
    header: Header,
    records: &[Record],
) -> ResponseInfo
where
    R: ResponseHandler + Send,
{
    let builder = MessageResponseBuilder::from_message_request(request);
    let response = builder.build(
        header,
        records.iter(),
        std::iter::empty(),
        std::iter::empty(),
        std::iter::empty(),
    );
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!("Failed to send DNS response: {}", e);
            let mut header = Header::response_from_request(request.header());
            header.set_response_code(ResponseCode::ServFail);
            header.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressResolver;
    use crate::registry::NameRegistry;
    use crate::types::{ContainerRecord, ContainerState};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn handler(root_domain: &str) -> (NameRegistry, DocknameDns) {
        let registry = NameRegistry::new(AddressResolver::new(None));
        let dns = DocknameDns {
            adapter: QueryAdapter::new(registry.clone()),
            root_domain: root_domain.to_string(),
            ttl: 5,
        };
        (registry, dns)
    }

    #[test]
    fn test_hostname_in_zone() {
        assert_eq!(hostname_in_zone("web.docker", "docker"), Some("web"));
        assert_eq!(hostname_in_zone("db.shop.docker", "docker"), Some("db.shop"));
        assert_eq!(hostname_in_zone("docker", "docker"), Some(""));
        assert_eq!(hostname_in_zone("webdocker", "docker"), None);
        assert_eq!(hostname_in_zone("example.com", "docker"), None);
        assert_eq!(hostname_in_zone("web", ""), Some("web"));
    }

    #[test]
    fn test_plan_answer_by_type() {
        let v4 = Some(ip("10.0.0.5"));
        let v6 = Some(ip("fd00::5"));

        assert_eq!(plan_answer(v4, RecordType::A), Answer::Address(ip("10.0.0.5")));
        assert_eq!(plan_answer(v4, RecordType::ANY), Answer::Address(ip("10.0.0.5")));
        assert_eq!(plan_answer(v4, RecordType::AAAA), Answer::NoData);
        assert_eq!(plan_answer(v6, RecordType::AAAA), Answer::Address(ip("fd00::5")));
        assert_eq!(plan_answer(v6, RecordType::A), Answer::NoData);
        assert_eq!(plan_answer(None, RecordType::A), Answer::NxDomain);
    }

    #[test]
    fn test_plan_uses_registry() {
        let (registry, dns) = handler("docker");
        registry.upsert(
            ContainerRecord::new("aaa", ContainerState::Running)
                .with_name("web")
                .with_network("bridge", ip("172.17.0.2")),
        );

        assert_eq!(
            dns.plan("web.docker", RecordType::A),
            Answer::Address(ip("172.17.0.2"))
        );
        assert_eq!(dns.plan("api.docker", RecordType::A), Answer::NxDomain);
        assert_eq!(dns.plan("docker", RecordType::A), Answer::NoData);
        assert_eq!(dns.plan("web.example.com", RecordType::A), Answer::Refused);
    }

    #[tokio::test]
    async fn test_bind_failure_requests_shutdown() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let (_registry, dns) = handler("docker");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let result =
            serve_or_shutdown(addr, dns.root_domain, dns.ttl, dns.adapter, shutdown_tx).await;

        assert!(result.is_err());
        assert!(*shutdown_rx.borrow());
    }
}

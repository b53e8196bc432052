//! Unit tests for the Linode REST client against a canned local server.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::*;
use crate::cloud::{AddressFamily, InstanceStatus};

#[derive(Debug, Default)]
struct Recorded {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Serves one canned response per connection, in order, and returns what
/// each request looked like.
async fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind canned server");
    let address = listener.local_addr().expect("local address");
    let handle = tokio::spawn(async move {
        let mut recorded = Vec::new();
        for (status, body) in responses {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut reader = BufReader::new(stream);
            let mut request = Recorded::default();
            reader
                .read_line(&mut request.request_line)
                .await
                .expect("read request line");
            let mut content_length = 0_usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.expect("read header");
                let trimmed = line.trim_end();
                if trimmed.is_empty() {
                    break;
                }
                if let Some((name, value)) = trimmed.split_once(':') {
                    let key = name.trim().to_ascii_lowercase();
                    let text = value.trim().to_owned();
                    if key == "content-length" {
                        content_length = text.parse().expect("content length");
                    }
                    request.headers.push((key, text));
                }
            }
            let mut payload = vec![0_u8; content_length];
            reader.read_exact(&mut payload).await.expect("read body");
            request.body = String::from_utf8(payload).expect("utf8 body");

            let response = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let mut stream = reader.into_inner();
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            stream.shutdown().await.expect("shutdown");
            recorded.push(request);
        }
        recorded
    });
    (format!("http://{address}"), handle)
}

fn client(base_url: &str) -> LinodeClient {
    let http = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("build http client");
    LinodeClient::new("test-token")
        .expect("token")
        .with_base_url(base_url)
        .with_http_client(http)
}

const INSTANCE_ONE: &str = r#"{"id":1,"label":"web-1","region":"us-east","type":"g6-nanode-1",
    "image":"linode/ubuntu18.04","status":"running","ipv4":["203.0.113.1"],"tags":["ansible"],
    "specs":{"disk":25600}}"#;

#[tokio::test]
async fn list_instances_follows_pages_and_sends_filter() {
    let first = format!(r#"{{"data":[{INSTANCE_ONE}],"page":1,"pages":2,"results":2}}"#);
    let second = r#"{"data":[{"id":2,"label":"web-2","region":"us-east","type":"g6-nanode-1",
        "image":null,"status":"booting","ipv4":[],"tags":[]}],"page":2,"pages":2,"results":2}"#;
    let (base, server) = serve(vec![(200, first), (200, second.to_owned())]).await;
    let filter = InstanceFilter::new(Some(String::from("us-east")), Some(String::from("ansible")));

    let instances = client(&base)
        .list_instances(&filter)
        .await
        .expect("list instances");
    let requests = server.await.expect("server task");

    assert_eq!(instances.len(), 2);
    assert_eq!(instances.get(1).map(|instance| instance.status), Some(InstanceStatus::Booting));
    assert_eq!(
        requests.first().map(|request| request.request_line.trim_end()),
        Some("GET /linode/instances?page=1&page_size=500 HTTP/1.1")
    );
    assert_eq!(
        requests.get(1).map(|request| request.request_line.trim_end()),
        Some("GET /linode/instances?page=2&page_size=500 HTTP/1.1")
    );
    for request in &requests {
        assert_eq!(request.header("authorization"), Some("Bearer test-token"));
        assert_eq!(
            request.header("x-filter"),
            Some(r#"{"region":"us-east","tags":"ansible"}"#)
        );
    }
}

#[tokio::test]
async fn empty_filter_sends_no_filter_header() {
    let (base, server) = serve(vec![(200, String::from(r#"{"data":[],"page":1,"pages":1}"#))]).await;

    let instances = client(&base)
        .list_instances(&InstanceFilter::default())
        .await
        .expect("list instances");
    let requests = server.await.expect("server task");

    assert!(instances.is_empty());
    assert_eq!(requests.first().and_then(|request| request.header("x-filter")), None);
}

#[tokio::test]
async fn api_errors_carry_reasons() {
    let (base, server) = serve(vec![(
        400,
        String::from(
            r#"{"errors":[{"reason":"Label must be unique among your Linodes","field":"label"}]}"#,
        ),
    )])
    .await;
    let request = CreateInstanceRequest {
        region: String::from("us-west"),
        instance_type: String::from("g6-nanode-1"),
        label: String::from("web-1"),
        private_ip: true,
        booted: false,
        tags: Vec::new(),
    };

    let err = client(&base)
        .create_instance(&request)
        .await
        .expect_err("duplicate label should fail");
    let requests = server.await.expect("server task");

    assert_eq!(
        err,
        LinodeError::Api {
            method: "POST",
            path: String::from("/linode/instances"),
            status: 400,
            reasons: vec![String::from("label: Label must be unique among your Linodes")],
        }
    );
    let body: serde_json::Value = requests
        .first()
        .map(|recorded| serde_json::from_str(&recorded.body).expect("json body"))
        .expect("one request");
    assert_eq!(body["private_ip"], true);
    assert_eq!(body["booted"], false);
    assert_eq!(body["type"], "g6-nanode-1");
}

#[tokio::test]
async fn boot_posts_the_config_id() {
    let (base, server) = serve(vec![(200, String::from("{}"))]).await;

    client(&base)
        .boot_instance(InstanceId::new(3), ConfigId::new(7))
        .await
        .expect("boot");
    let requests = server.await.expect("server task");

    let request = requests.first().expect("one request");
    assert_eq!(request.request_line.trim_end(), "POST /linode/instances/3/boot HTTP/1.1");
    assert_eq!(request.body, r#"{"config_id":7}"#);
}

#[tokio::test]
async fn ip_addresses_deserialise_family_and_owner() {
    let (base, server) = serve(vec![(
        200,
        String::from(
            r#"{"data":[{"address":"203.0.113.1","type":"ipv4","public":true,"linode_id":1},
            {"address":"2600:3c03::/64","type":"ipv6/pool","public":true,"linode_id":null}],
            "page":1,"pages":1}"#,
        ),
    )])
    .await;

    let addresses = client(&base).list_ip_addresses().await.expect("list ips");
    server.await.expect("server task");

    assert_eq!(addresses.len(), 2);
    assert_eq!(addresses.first().map(|ip| ip.family), Some(AddressFamily::Ipv4));
    assert_eq!(addresses.get(1).map(|ip| ip.family), Some(AddressFamily::Other));
    assert_eq!(addresses.get(1).and_then(|ip| ip.instance_id), None);
}

#[tokio::test]
async fn malformed_success_body_is_a_decode_error() {
    let (base, server) = serve(vec![(200, String::from("not json"))]).await;

    let err = client(&base)
        .get_image("linode/ubuntu18.04")
        .await
        .expect_err("garbage should fail");
    let requests = server.await.expect("server task");

    assert!(matches!(err, LinodeError::Decode { ref path, .. } if path == "/images/linode/ubuntu18.04"));
    assert_eq!(
        requests.first().map(|request| request.request_line.trim_end()),
        Some("GET /images/linode/ubuntu18.04 HTTP/1.1")
    );
}

#[test]
fn blank_token_is_rejected() {
    assert_eq!(LinodeClient::new("  ").err(), Some(LinodeError::MissingToken));
}

#[test]
fn debug_output_redacts_the_token() {
    let rendered = format!("{:?}", LinodeClient::new("secret-token").expect("token"));
    assert!(!rendered.contains("secret-token"));
    assert!(rendered.contains(LINODE_API_BASE));
}

#[test]
fn base_url_drops_trailing_slash() {
    let client = LinodeClient::new("t")
        .expect("token")
        .with_base_url("http://127.0.0.1:9/v4/");
    assert_eq!(client.base_url(), "http://127.0.0.1:9/v4");
}

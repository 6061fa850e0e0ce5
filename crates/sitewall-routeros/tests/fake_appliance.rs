//! RouterOsClient against an in-process fake RouterOS API server

use sitewall_config::ApplianceConfig;
use sitewall_reconcile::{
    ControlPlaneClient, ControlPlaneError, Operation, Outcome, SiteAccessError,
    SiteAccessReconciler,
};
use sitewall_routeros::protocol::{parse_attributes, read_sentence, write_sentence};
use sitewall_routeros::RouterOsClient;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};

type Record = BTreeMap<String, String>;

#[derive(Default)]
struct FakeState {
    layer7: Vec<Record>,
    filter: Vec<Record>,
    next_id: u32,
    logins: usize,
    hang_on_print: bool,
    print_delay: Option<Duration>,
}

struct FakeRouter {
    addr: SocketAddr,
    state: Arc<Mutex<FakeState>>,
}

impl FakeRouter {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(FakeState::default()));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(serve(stream, state));
            }
        });

        Self { addr, state }
    }

    fn config(&self, password: &str) -> ApplianceConfig {
        ApplianceConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            username: "admin".to_string(),
            password: password.to_string(),
            timeout_secs: 2,
        }
    }

    fn client(&self) -> Arc<RouterOsClient> {
        Arc::new(RouterOsClient::new(self.config("secret")))
    }

    fn layer7(&self) -> Vec<Record> {
        self.state.lock().unwrap().layer7.clone()
    }

    fn filter(&self) -> Vec<Record> {
        self.state.lock().unwrap().filter.clone()
    }

    fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }

    fn hang_on_print(&self, hang: bool) {
        self.state.lock().unwrap().hang_on_print = hang;
    }

    fn delay_print(&self, delay: Duration) {
        self.state.lock().unwrap().print_delay = Some(delay);
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    let mut stream = BufStream::new(stream);
    let mut logged_in = false;

    while let Ok(words) = read_sentence(&mut stream).await {
        let Some((command, rest)) = words.split_first() else {
            continue;
        };
        let attrs: Record = parse_attributes(rest).into_iter().collect();

        if command == "/login" {
            let ok = attrs.get("name").map(String::as_str) == Some("admin")
                && attrs.get("password").map(String::as_str) == Some("secret");
            if ok {
                logged_in = true;
                state.lock().unwrap().logins += 1;
                send(&mut stream, &["!done"]).await;
            } else {
                send(&mut stream, &["!trap", "=message=invalid user name or password (6)"]).await;
                send(&mut stream, &["!done"]).await;
            }
            continue;
        }

        if !logged_in {
            send(&mut stream, &["!fatal", "not logged in"]).await;
            return;
        }

        let (menu, verb) = command.rsplit_once('/').unwrap();
        let (hang, delay) = {
            let state = state.lock().unwrap();
            (state.hang_on_print, state.print_delay)
        };
        if verb == "print" {
            if hang {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        let replies = {
            let mut state = state.lock().unwrap();
            handle(&mut state, menu, verb, attrs)
        };
        for reply in replies {
            let words: Vec<&str> = reply.iter().map(String::as_str).collect();
            send(&mut stream, &words).await;
        }
    }
}

fn handle(state: &mut FakeState, menu: &str, verb: &str, attrs: Record) -> Vec<Vec<String>> {
    let done = vec!["!done".to_string()];
    let next_id = {
        state.next_id += 1;
        format!("*{:X}", state.next_id)
    };
    let table = match menu {
        "/ip/firewall/layer7-protocol" => &mut state.layer7,
        "/ip/firewall/filter" => &mut state.filter,
        _ => {
            return vec![
                vec!["!trap".to_string(), "=message=no such command".to_string()],
                done,
            ]
        }
    };

    match verb {
        "print" => {
            let mut replies: Vec<Vec<String>> = table
                .iter()
                .map(|record| {
                    std::iter::once("!re".to_string())
                        .chain(record.iter().map(|(k, v)| format!("={k}={v}")))
                        .collect()
                })
                .collect();
            // RouterOS 7.18+ marks an empty print explicitly
            if replies.is_empty() {
                replies.push(vec!["!empty".to_string()]);
            }
            replies.push(done);
            replies
        }
        "add" => {
            let mut record = attrs;
            record.insert(".id".to_string(), next_id.clone());
            table.push(record);
            vec![vec!["!done".to_string(), format!("=ret={next_id}")]]
        }
        "remove" => {
            let id = attrs.get(".id").cloned().unwrap_or_default();
            let before = table.len();
            table.retain(|r| r.get(".id") != Some(&id));
            if table.len() == before {
                vec![
                    vec!["!trap".to_string(), "=message=no such item".to_string()],
                    done,
                ]
            } else {
                vec![done]
            }
        }
        _ => vec![
            vec!["!trap".to_string(), "=message=no such command".to_string()],
            done,
        ],
    }
}

async fn send(stream: &mut BufStream<TcpStream>, words: &[&str]) {
    let _ = write_sentence(stream, words).await;
}

#[tokio::test]
async fn test_block_and_allow_against_router() {
    let router = FakeRouter::start().await;
    let reconciler = SiteAccessReconciler::new(router.client(), Duration::from_secs(2));

    let blocked = reconciler.handle("youtube.com", "block").await.unwrap();
    assert_eq!(blocked.outcome(), Outcome::Blocked);

    let layer7 = router.layer7();
    assert_eq!(layer7.len(), 1);
    assert_eq!(layer7[0]["name"], "youtube.com");
    assert_eq!(layer7[0]["regexp"], ".*youtube.com.*");

    let filter = router.filter();
    assert_eq!(filter.len(), 1);
    assert_eq!(filter[0]["chain"], "forward");
    assert_eq!(filter[0]["protocol"], "tcp");
    assert_eq!(filter[0]["action"], "drop");
    assert_eq!(filter[0]["layer7-protocol"], "youtube.com");
    assert_eq!(filter[0]["comment"], "Blocked by sitewall (site: youtube.com)");

    let again = reconciler.handle("youtube.com", "block").await.unwrap();
    assert_eq!(again.outcome(), Outcome::AlreadyBlocked);
    assert_eq!(router.layer7().len(), 1);
    assert_eq!(router.filter().len(), 1);

    let allowed = reconciler.handle("youtube.com", "allow").await.unwrap();
    assert_eq!(allowed.message(), "site youtube.com unblocked (1 rule removed)");
    assert!(router.layer7().is_empty());
    assert!(router.filter().is_empty());

    assert_eq!(router.logins(), 1);
}

#[tokio::test]
async fn test_empty_menus_list_nothing() {
    let router = FakeRouter::start().await;
    let client = router.client();

    assert!(client.list_matchers().await.unwrap().is_empty());
    assert!(client.list_filter_rules().await.unwrap().is_empty());
    assert_eq!(router.logins(), 1);
}

#[tokio::test]
async fn test_list_and_add_map_records() {
    let router = FakeRouter::start().await;
    let client = router.client();

    let matcher = client.add_matcher("a.com", ".*a.com.*").await.unwrap();
    assert_eq!(matcher.id, "*1");

    let matchers = client.list_matchers().await.unwrap();
    assert_eq!(matchers, vec![matcher]);
    assert!(client.list_filter_rules().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_missing_item_is_not_found_and_keeps_session() {
    let router = FakeRouter::start().await;
    let client = router.client();

    let err = client.remove_filter_rule("*99").await.unwrap_err();
    assert_eq!(err, ControlPlaneError::NotFound("no such item".to_string()));

    client.list_filter_rules().await.unwrap();
    assert_eq!(router.logins(), 1);
}

#[tokio::test]
async fn test_bad_credentials_are_connection_errors() {
    let router = FakeRouter::start().await;
    let client = RouterOsClient::new(router.config("wrong"));

    let err = client.list_matchers().await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::Connection(ref m) if m.contains("login rejected")));
    assert_eq!(router.logins(), 0);
}

#[tokio::test]
async fn test_unreachable_router_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = RouterOsClient::new(ApplianceConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        timeout_secs: 2,
    });

    let err = client.list_matchers().await.unwrap_err();
    assert!(matches!(err, ControlPlaneError::Connection(_)));
}

#[tokio::test]
async fn test_timed_out_call_forces_new_session() {
    let router = FakeRouter::start().await;
    let reconciler = SiteAccessReconciler::new(router.client(), Duration::from_millis(200));

    router.hang_on_print(true);
    let err = reconciler.handle("youtube.com", "block").await.unwrap_err();
    let SiteAccessError::Reconciliation(err) = err else {
        panic!("expected reconciliation error, got {err:?}");
    };
    assert_eq!(err.operation, Operation::ListMatchers);
    assert!(matches!(err.source, ControlPlaneError::Connection(_)));

    router.hang_on_print(false);
    let result = reconciler.handle("youtube.com", "block").await.unwrap();
    assert_eq!(result.outcome(), Outcome::Blocked);
    assert_eq!(router.logins(), 2);
}

#[tokio::test]
async fn test_slow_router_does_not_serialize_sites() {
    let router = FakeRouter::start().await;
    router.delay_print(Duration::from_millis(600));
    let client = router.client();
    let reconciler = Arc::new(SiteAccessReconciler::new(client.clone(), Duration::from_secs(1)));

    let a = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.handle("a.example.com", "block").await })
    };
    let b = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.handle("b.example.com", "block").await })
    };

    assert_eq!(a.await.unwrap().unwrap().outcome(), Outcome::Blocked);
    assert_eq!(b.await.unwrap().unwrap().outcome(), Outcome::Blocked);
    assert_eq!(router.layer7().len(), 2);
    assert_eq!(router.filter().len(), 2);
    assert_eq!(router.logins(), 2);
    assert_eq!(client.idle_sessions(), 2);
}


#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tests for the request lifecycle on a connection slot
//!
//! # Test Coverage
//!
//! - Sequential requests on one `ConnectionSlot` never see each other's state
//! - Form body parameters: extracted once, kept across forwards, honouring limits
//! - Sessions: creation, commit on response commit, completion on recycle
//! - Request id propagation from `x-request-id`
//! - Configuration from YAML feeding request limits
//! - A declared form length over the limit is refused before the body is read
//! - Cookies, locales, typed headers and connection addresses
//! - Requested session id from cookie or path parameter, session id renewal
//! - Programmatic login and logout through a `LoginService`

mod common;

use common::{handler, headers, init_tracing, RecordingResponse};
use http::{HeaderMap, Method, Version};
use parking_lot::Mutex;
use reqscope::auth::{Authentication, LoginService, UserIdentity};
use reqscope::content::{BufferedTransport, InputMode};
use reqscope::ids::RequestId;
use reqscope::session::{Session, SessionManager};
use reqscope::{ConnectionSlot, Dispatcher, RequestContext, RuntimeConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

const FORM: (&str, &str) = ("content-type", "application/x-www-form-urlencoded");

fn slot() -> ConnectionSlot {
    init_tracing();
    ConnectionSlot::new(Arc::new(RuntimeConfig::default()))
}

#[test]
fn test_sequential_requests_are_isolated() {
    let mut slot = slot();

    slot.serve(
        Method::POST,
        "/first?a=1",
        Version::HTTP_11,
        headers(&[FORM, ("host", "one.example")]),
        Box::new(BufferedTransport::new("b=2")),
        |req| {
            req.set_attribute("seen", "first");
            req.set_authentication(Authentication::User(UserIdentity::new("alice", "BASIC")));
            assert_eq!(req.parameter("b")?.as_deref(), Some("2"));
            Ok(())
        },
    )
    .unwrap();

    slot.serve(
        Method::GET,
        "/second",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert!(req.attribute("seen").is_none());
            assert!(req.remote_user().is_none());
            assert!(req.parameter_names()?.is_empty());
            assert_eq!(req.server_name(), None);
            assert_eq!(req.original_uri(), Some("/second"));
            assert_eq!(req.content().mode(), InputMode::Idle);
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(slot.requests_served(), 2);
}

#[test]
fn test_form_parameters_survive_forward_once() {
    let mut req = RequestContext::default();
    init_tracing();
    req.set_metadata(
        Method::POST,
        "/app/form?q=1",
        Version::HTTP_11,
        headers(&[FORM, ("content-length", "3")]),
    )
    .unwrap();
    req.set_content_transport(Box::new(BufferedTransport::new("a=1")));
    req.set_context_path(Some("/app".to_string()));
    let mut res = RecordingResponse::default();

    let inside = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let inside = Arc::clone(&inside);
        handler(move |_, req, _| {
            inside.lock().push(req.parameter_values("a")?);
            inside.lock().push(req.parameter_values("q")?);
            Ok(())
        })
    };
    Dispatcher::for_path("/app", "/next?a=2", target)
        .forward(&mut req, &mut res)
        .unwrap();

    assert_eq!(*inside.lock(), vec![vec!["2", "1"], vec!["1"]]);
    // Body values extracted during the forward stay; the body is not read again
    assert_eq!(req.parameter_values("a").unwrap(), vec!["1"]);
    assert_eq!(req.parameter_values("q").unwrap(), vec!["1"]);
    assert_eq!(req.content().consumed(), 3);
    assert_eq!(req.content().mode(), InputMode::Stream);
}

#[test]
fn test_form_key_limit_from_yaml() {
    init_tracing();
    let config = RuntimeConfig::from_yaml_str("max_form_keys: 1\n").unwrap();
    let mut slot = ConnectionSlot::new(Arc::new(config));
    let outcome = slot.serve(
        Method::PUT,
        "/form",
        Version::HTTP_11,
        headers(&[FORM]),
        Box::new(BufferedTransport::new("a=1&b=2")),
        |req| req.parameter("a"),
    );
    let err = outcome.unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(err.to_string(), "bad message 400: Unable to parse form content");
}

#[test]
fn test_request_id_from_header() {
    let mut slot = slot();
    let id = RequestId::new();
    let seen = slot
        .serve(
            Method::GET,
            "/",
            Version::HTTP_11,
            headers(&[("x-request-id", &id.to_string())]),
            Box::new(BufferedTransport::empty()),
            |req| Ok(req.request_id()),
        )
        .unwrap();
    assert_eq!(seen, id);
}

struct CountedSession {
    id: String,
}

impl Session for CountedSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn manager_name(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
struct MemoryManager {
    created: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl SessionManager for MemoryManager {
    fn name(&self) -> &str {
        "memory"
    }

    fn new_session(&self) -> reqscope::Result<Arc<dyn Session>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountedSession {
            id: format!("s{}", n),
        }))
    }

    fn complete(&self, session: &dyn Session) {
        self.log.lock().push(format!("complete {}", session.id()));
    }

    fn commit(&self, session: &dyn Session) {
        self.log.lock().push(format!("commit {}", session.id()));
    }

    fn renew_id(&self, session: &dyn Session) -> reqscope::Result<String> {
        Ok(format!("{}-renewed", session.id()))
    }
}

#[test]
fn test_session_lifecycle_through_slot() {
    let manager = Arc::new(MemoryManager::default());
    let mut slot = slot();

    slot.serve(
        Method::GET,
        "/login",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert!(req.session(true).is_err());
            req.set_session_manager(Some(Arc::clone(&manager) as Arc<dyn SessionManager>));
            let session = req.session(true)?.expect("session created");
            assert_eq!(session.id(), "s0");
            assert_eq!(req.session_for("memory").map(|s| s.id().to_string()), Some("s0".into()));
            req.on_response_commit();
            req.on_response_commit();
            assert!(req.is_response_committed());
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(*manager.log.lock(), vec!["commit s0", "complete s0"]);

    slot.serve(
        Method::GET,
        "/next",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert!(req.session_manager().is_none());
            assert!(req.session(false)?.is_none());
            Ok(())
        },
    )
    .unwrap();
}

#[test]
fn test_session_not_created_after_commit() {
    let manager = Arc::new(MemoryManager::default());
    let mut slot = slot();
    let err = slot
        .serve(
            Method::GET,
            "/late",
            Version::HTTP_11,
            HeaderMap::new(),
            Box::new(BufferedTransport::empty()),
            |req| {
                req.set_session_manager(Some(Arc::clone(&manager) as Arc<dyn SessionManager>));
                req.on_response_commit();
                req.session(true).map(|_| ())
            },
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "illegal state: Response is committed");
    assert_eq!(manager.created.load(Ordering::SeqCst), 0);
}

#[test]
fn test_bad_target_is_rejected_and_slot_reusable() {
    let mut slot = slot();
    let err = slot
        .serve(
            Method::GET,
            "/a/../../etc",
            Version::HTTP_11,
            HeaderMap::new(),
            Box::new(BufferedTransport::empty()),
            |_| Ok(()),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "bad message 400: Bad URI");

    let path = slot
        .serve(
            Method::GET,
            "/ok",
            Version::HTTP_11,
            HeaderMap::new(),
            Box::new(BufferedTransport::empty()),
            |req| Ok(req.path_info().map(str::to_owned)),
        )
        .unwrap();
    assert_eq!(path.as_deref(), Some("/ok"));
}

#[test]
fn test_reader_drained_on_recycle() {
    let mut slot = slot();
    {
        let mut active = slot
            .begin_request(
                Method::POST,
                "/text",
                Version::HTTP_11,
                headers(&[("content-type", "text/plain")]),
                Box::new(BufferedTransport::new("line one\nline two\n")),
            )
            .unwrap();
        let mut reader = active.reader().unwrap();
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("line one"));
    }
    assert_eq!(slot.request().content().mode(), InputMode::Idle);
    assert_eq!(slot.request().content().consumed(), 0);
}

#[test]
fn test_declared_form_length_over_limit_is_not_read() {
    init_tracing();
    let config = RuntimeConfig::from_yaml_str("max_form_content_size: 4\n").unwrap();
    let mut slot = ConnectionSlot::new(Arc::new(config));
    let mut active = slot
        .begin_request(
            Method::POST,
            "/form",
            Version::HTTP_11,
            headers(&[FORM, ("content-length", "100")]),
            Box::new(BufferedTransport::new("a=1")),
        )
        .unwrap();

    let err = active.parameters().unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(err.to_string(), "bad message 400: Unable to parse form content");
    assert_eq!(active.content().mode(), InputMode::Idle);
    assert_eq!(active.content_read(), 0);
}

#[test]
fn test_client_metadata_and_endpoints() {
    let mut slot = slot();
    let remote: SocketAddr = "192.0.2.7:51000".parse().unwrap();
    let local: SocketAddr = "10.0.0.1:8443".parse().unwrap();
    slot.set_endpoints(Some(remote), Some(local));

    slot.serve(
        Method::GET,
        "/app/page",
        Version::HTTP_11,
        headers(&[
            ("cookie", "SESSION=abc; theme=dark"),
            ("accept-language", "fr-CA;q=0.5, de"),
            ("max-forwards", "3"),
            ("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ("x-count", "many"),
        ]),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert_eq!(req.cookies().len(), 2);
            assert_eq!(req.cookie("theme").as_deref(), Some("dark"));
            let tags: Vec<String> = req.locales().iter().map(ToString::to_string).collect();
            assert_eq!(tags, vec!["de", "fr-CA"]);
            assert_eq!(req.int_header("max-forwards")?, Some(3));
            assert_eq!(req.int_header("x-absent")?, None);
            assert_eq!(req.int_header("x-count").unwrap_err().status(), 400);
            assert_eq!(
                req.date_header("if-modified-since")?,
                Some(UNIX_EPOCH + Duration::from_secs(784_111_777))
            );
            assert_eq!(req.remote_addr(), Some(remote));
            req.set_remote_addr(Some("203.0.113.9:443".parse().unwrap()));
            assert_eq!(req.remote_port(), 443);
            assert_eq!(req.local_port(), 8443);
            Ok(())
        },
    )
    .unwrap();

    slot.serve(
        Method::GET,
        "/app/next",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert!(req.cookies().is_empty());
            assert!(req.locale().is_none());
            assert_eq!(req.remote_addr(), Some(remote));
            assert_eq!(req.local_addr(), Some(local));
            Ok(())
        },
    )
    .unwrap();
}

#[test]
fn test_requested_session_id_sources() {
    let manager = Arc::new(MemoryManager::default());
    let mut slot = slot();

    slot.serve(
        Method::GET,
        "/app/cart",
        Version::HTTP_11,
        headers(&[("cookie", "JSESSIONID=s0")]),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert_eq!(req.extract_requested_session_id("JSESSIONID", "jsessionid"), Some("s0"));
            assert!(req.is_requested_session_id_from_cookie());
            assert!(!req.is_requested_session_id_from_url());
            assert!(!req.is_requested_session_id_valid());

            req.set_session_manager(Some(Arc::clone(&manager) as Arc<dyn SessionManager>));
            req.session(true)?;
            assert!(req.is_requested_session_id_valid());
            assert_eq!(req.change_session_id()?, "s0-renewed");
            Ok(())
        },
    )
    .unwrap();

    slot.serve(
        Method::GET,
        "/app/cart;jsessionid=s9/item?x=1",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert!(req.requested_session_id().is_none());
            assert_eq!(req.extract_requested_session_id("JSESSIONID", "jsessionid"), Some("s9"));
            assert!(req.is_requested_session_id_from_url());
            assert!(!req.is_requested_session_id_valid());
            let err = req.change_session_id().unwrap_err();
            assert_eq!(err.to_string(), "illegal state: No session");
            Ok(())
        },
    )
    .unwrap();
}

#[derive(Default)]
struct Passwords {
    log: Mutex<Vec<String>>,
}

impl LoginService for Passwords {
    fn login(&self, username: &str, password: &str) -> reqscope::Result<Option<UserIdentity>> {
        self.log.lock().push(format!("login {}", username));
        Ok((username == "alice" && password == "secret")
            .then(|| UserIdentity::new(username, "FORM").with_role("admin")))
    }

    fn logout(&self, user: &UserIdentity) {
        self.log.lock().push(format!("logout {}", user.name));
    }
}

#[test]
fn test_login_and_logout() {
    let service = Arc::new(Passwords::default());
    let mut slot = slot();

    slot.serve(
        Method::POST,
        "/login",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert_eq!(req.login("alice", "secret").unwrap_err().status(), 401);

            req.set_login_service(Some(Arc::clone(&service) as Arc<dyn LoginService>));
            let err = req.login("alice", "guess").unwrap_err();
            assert_eq!(
                err.to_string(),
                "authentication failed: Authentication failed for username 'alice'"
            );
            assert!(req.remote_user().is_none());

            req.login("alice", "secret")?;
            assert_eq!(req.remote_user(), Some("alice"));
            assert!(req.is_user_in_role("admin"));
            let err = req.login("bob", "secret").unwrap_err();
            assert_eq!(err.to_string(), "authentication failed: Already authenticated as alice");

            req.logout();
            assert_eq!(req.authentication(), &Authentication::Unauthenticated);
            Ok(())
        },
    )
    .unwrap();

    assert_eq!(
        *service.log.lock(),
        vec!["login alice", "login alice", "logout alice"]
    );

    slot.serve(
        Method::POST,
        "/login",
        Version::HTTP_11,
        HeaderMap::new(),
        Box::new(BufferedTransport::empty()),
        |req| {
            assert_eq!(req.login("alice", "secret").unwrap_err().status(), 401);
            Ok(())
        },
    )
    .unwrap();
}

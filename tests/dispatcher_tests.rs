#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Tests for include / forward / error dispatch
//!
//! # Test Coverage
//!
//! - Restoration of URI, paths, query parameters, attributes and dispatch kind after
//!   every dispatch, including handler errors and panics
//! - Query merge order: forward puts the target's values first, include appends them
//! - Reserved attribute namespaces: `dispatch.forward.*` / `dispatch.include.*`
//! - First-hop-wins forward metadata across chained forwards
//! - Error dispatch absorbing query decoding failures
//! - Response control calls (reset, close, include marks)
//! - Named dispatch: no overlay, outer metadata kept, output left open

mod common;

use common::{app_request, handler, text, view, RecordingResponse, View};
use http::Method;
use parking_lot::Mutex;
use reqscope::attributes::keys;
use reqscope::dispatcher::{Dispatcher, OutputMode};
use reqscope::{DispatchKind, RequestError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

fn recorder() -> Arc<Mutex<Vec<View>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_forward_rewrites_then_restores() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();
    let before = view(&mut req);

    let seen = recorder();
    let forwarded = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let seen = Arc::clone(&seen);
        let forwarded = Arc::clone(&forwarded);
        handler(move |target, req, _res| {
            assert_eq!(target, "/b");
            seen.lock().push(view(req));
            forwarded.lock().extend([
                text(req, keys::FORWARD_REQUEST_URI),
                text(req, keys::FORWARD_CONTEXT_PATH),
                text(req, keys::FORWARD_PATH_INFO),
                text(req, keys::FORWARD_QUERY_STRING),
            ]);
            Ok(())
        })
    };

    Dispatcher::for_path("/app", "/b?y=2", target)
        .forward(&mut req, &mut res)
        .unwrap();

    let inside = seen.lock()[0].clone();
    assert_eq!(inside.request_uri.as_deref(), Some("/app/b"));
    assert_eq!(inside.query_string.as_deref(), Some("y=2"));
    assert_eq!(inside.context_path.as_deref(), Some("/app"));
    assert_eq!(inside.path_info.as_deref(), Some("/b"));
    assert_eq!(inside.handler_path, None);
    assert_eq!(inside.kind, DispatchKind::Forward);
    assert_eq!(
        inside.params,
        vec![
            ("x".to_string(), vec!["1".to_string()]),
            ("y".to_string(), vec!["2".to_string()]),
        ]
    );
    assert_eq!(
        *forwarded.lock(),
        vec![
            Some("/app/a".to_string()),
            Some("/app".to_string()),
            Some("/a".to_string()),
            Some("x=1".to_string()),
        ]
    );

    assert_eq!(view(&mut req), before);
    assert!(req.attribute(keys::FORWARD_REQUEST_URI).is_none());
    assert_eq!(req.attributes().depth(), 0);
    assert_eq!(req.server_name(), Some("example.com"));
    assert_eq!(res.events, vec!["reset", "close_output"]);
}

#[test]
fn test_forward_puts_target_values_first() {
    let mut req = app_request(Method::GET, "/app/p?a=1");
    let mut res = RecordingResponse::default();
    let values = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let values = Arc::clone(&values);
        handler(move |_, req, _| {
            *values.lock() = req.parameter_values("a")?;
            Ok(())
        })
    };

    Dispatcher::for_path("/app", "/q?a=2", target)
        .forward(&mut req, &mut res)
        .unwrap();
    assert_eq!(*values.lock(), vec!["2", "1"]);
    assert_eq!(req.parameter_values("a").unwrap(), vec!["1"]);
}

#[test]
fn test_include_appends_target_values() {
    let mut req = app_request(Method::GET, "/app/p?a=1");
    let mut res = RecordingResponse::default();
    // Materialised before the include: the merge must start from these values
    assert_eq!(req.parameter_values("a").unwrap(), vec!["1"]);

    let values = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let values = Arc::clone(&values);
        handler(move |_, req, _| {
            *values.lock() = req.parameter_values("a")?;
            Ok(())
        })
    };

    Dispatcher::for_path("/app", "/q?a=2", target)
        .include(&mut req, &mut res)
        .unwrap();
    assert_eq!(*values.lock(), vec!["1", "2"]);
    assert_eq!(req.parameter_values("a").unwrap(), vec!["1"]);
}

#[test]
fn test_include_keeps_uri_and_exposes_target() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();
    let before = view(&mut req);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let seen = Arc::clone(&seen);
        handler(move |target, req, res| {
            assert_eq!(target, "/inc");
            assert_eq!(req.dispatch_kind(), DispatchKind::Include);
            assert_eq!(req.request_uri(), Some("/app/a"));
            assert_eq!(req.query_string(), Some("x=1"));
            assert!(!res.is_committed());
            seen.lock().extend([
                text(req, keys::INCLUDE_REQUEST_URI),
                text(req, keys::INCLUDE_CONTEXT_PATH),
                text(req, keys::INCLUDE_PATH_INFO),
                text(req, keys::INCLUDE_QUERY_STRING),
                text(req, keys::INCLUDE_HANDLER_PATH),
                req.parameter("z")?,
            ]);
            Ok(())
        })
    };

    Dispatcher::for_path("/app", "/inc?z=3", target)
        .include(&mut req, &mut res)
        .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            Some("/app/inc".to_string()),
            Some("/app".to_string()),
            Some("/inc".to_string()),
            Some("z=3".to_string()),
            None,
            Some("3".to_string()),
        ]
    );
    assert_eq!(view(&mut req), before);
    assert_eq!(res.events, vec!["including", "included"]);
    assert_eq!(res.including, 0);
}

#[test]
fn test_chained_forwards_keep_first_origin() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();
    let before = view(&mut req);

    let innermost = recorder();
    let origin = Arc::new(Mutex::new(Vec::new()));
    let to_c = {
        let innermost = Arc::clone(&innermost);
        let origin = Arc::clone(&origin);
        Dispatcher::for_path(
            "/app",
            "/c",
            handler(move |_, req, _| {
                innermost.lock().push(view(req));
                origin.lock().extend([
                    text(req, keys::FORWARD_REQUEST_URI),
                    text(req, keys::FORWARD_QUERY_STRING),
                    text(req, keys::FORWARD_PATH_INFO),
                ]);
                Ok(())
            }),
        )
    };

    let middle = recorder();
    let to_b = {
        let middle = Arc::clone(&middle);
        Dispatcher::for_path(
            "/app",
            "/b?y=2",
            handler(move |_, req, res| {
                let entered = view(req);
                to_c.forward(req, res)?;
                assert_eq!(view(req), entered);
                middle.lock().push(entered);
                Ok(())
            }),
        )
    };

    to_b.forward(&mut req, &mut res).unwrap();

    let c = innermost.lock()[0].clone();
    assert_eq!(c.request_uri.as_deref(), Some("/app/c"));
    assert_eq!(c.query_string.as_deref(), Some("y=2"));
    assert_eq!(c.path_info.as_deref(), Some("/c"));
    assert_eq!(
        c.params,
        vec![
            ("x".to_string(), vec!["1".to_string()]),
            ("y".to_string(), vec!["2".to_string()]),
        ]
    );
    assert_eq!(
        *origin.lock(),
        vec![
            Some("/app/a".to_string()),
            Some("x=1".to_string()),
            Some("/a".to_string()),
        ]
    );

    let b = middle.lock()[0].clone();
    assert_eq!(b.request_uri.as_deref(), Some("/app/b"));
    assert_eq!(b.query_string.as_deref(), Some("y=2"));

    assert_eq!(view(&mut req), before);
}

#[test]
fn test_forward_hides_include_namespace() {
    let mut req = app_request(Method::GET, "/app/a");
    let mut res = RecordingResponse::default();
    req.set_attribute(keys::INCLUDE_REQUEST_URI, "/spoofed");
    req.set_attribute("user.key", "kept");

    let names = Arc::new(Mutex::new(Vec::new()));
    let forward = {
        let names = Arc::clone(&names);
        Dispatcher::for_path(
            "/app",
            "/fwd",
            handler(move |_, req, _| {
                assert!(req.attribute(keys::INCLUDE_REQUEST_URI).is_none());
                assert_eq!(text(req, "user.key").as_deref(), Some("kept"));
                *names.lock() = req.attribute_names();
                Ok(())
            }),
        )
    };
    let include = Dispatcher::for_path(
        "/app",
        "/inc",
        handler(move |_, req, res| {
            assert_eq!(text(req, keys::INCLUDE_REQUEST_URI).as_deref(), Some("/app/inc"));
            forward.forward(req, res)?;
            assert_eq!(text(req, keys::INCLUDE_REQUEST_URI).as_deref(), Some("/app/inc"));
            Ok(())
        }),
    );

    include.include(&mut req, &mut res).unwrap();

    let names = names.lock().clone();
    assert!(names.contains(&"user.key".to_string()));
    assert!(names.contains(&keys::FORWARD_REQUEST_URI.to_string()));
    assert!(!names.iter().any(|n| n.starts_with(keys::INCLUDE_PREFIX)));

    assert_eq!(text(&req, keys::INCLUDE_REQUEST_URI).as_deref(), Some("/spoofed"));
    assert_eq!(req.attributes().depth(), 0);
}

#[test]
fn test_user_attributes_set_inside_dispatch_survive() {
    let mut req = app_request(Method::GET, "/app/a");
    let mut res = RecordingResponse::default();
    let target = handler(|_, req, _| {
        req.set_attribute("result", "from-include");
        req.set_attribute(keys::INCLUDE_PATH_INFO, "/rewritten");
        assert_eq!(text(req, keys::INCLUDE_PATH_INFO).as_deref(), Some("/rewritten"));
        assert!(req.clear_attributes().is_err());
        Ok(())
    });
    Dispatcher::for_path("/app", "/inc", target)
        .include(&mut req, &mut res)
        .unwrap();

    assert_eq!(text(&req, "result").as_deref(), Some("from-include"));
    assert!(req.attribute(keys::INCLUDE_PATH_INFO).is_none());
    req.clear_attributes().unwrap();
    assert!(req.attribute_names().is_empty());
}

#[test]
fn test_named_dispatch_leaves_uri() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();
    let before = view(&mut req);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let seen = Arc::clone(&seen);
        handler(move |target, req, _| {
            seen.lock().push((
                target.to_string(),
                req.dispatch_kind(),
                req.request_uri().map(str::to_owned),
                req.attribute_names(),
            ));
            Ok(())
        })
    };
    let named = Dispatcher::named("status-page", target);
    assert_eq!(named.name(), Some("status-page"));
    assert!(named.uri().is_none());

    named.include(&mut req, &mut res).unwrap();
    named.forward(&mut req, &mut res).unwrap();

    let seen = seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            (
                "status-page".to_string(),
                DispatchKind::Include,
                Some("/app/a".to_string()),
                Vec::<String>::new()
            ),
            (
                "status-page".to_string(),
                DispatchKind::Forward,
                Some("/app/a".to_string()),
                Vec::<String>::new()
            ),
        ]
    );
    // A named forward leaves the output open
    assert_eq!(res.events, vec!["including", "included", "reset"]);
    assert!(!res.output_closed);
    assert_eq!(view(&mut req), before);
}

#[test]
fn test_named_dispatch_keeps_outer_metadata() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let inner = {
        let seen = Arc::clone(&seen);
        handler(move |_, req, _| {
            let names = req.attribute_names();
            seen.lock().push((
                text(req, keys::INCLUDE_REQUEST_URI),
                text(req, keys::FORWARD_REQUEST_URI),
                names.iter().any(|n| n == keys::INCLUDE_REQUEST_URI),
                names.iter().any(|n| n == keys::FORWARD_REQUEST_URI),
            ));
            Ok(())
        })
    };
    let outer = {
        let inner = Arc::clone(&inner);
        handler(move |_, req, res| Dispatcher::named("fragment", Arc::clone(&inner)).include(req, res))
    };

    Dispatcher::for_path("/app", "/inc", Arc::clone(&outer))
        .include(&mut req, &mut res)
        .unwrap();
    Dispatcher::for_path("/app", "/b", outer)
        .forward(&mut req, &mut res)
        .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            (Some("/app/inc".to_string()), None, true, false),
            (None, Some("/app/a".to_string()), false, true),
        ]
    );
    assert_eq!(req.attributes().depth(), 0);
}

#[test]
fn test_handler_error_restores() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();
    let before = view(&mut req);

    let failing = handler(|_, req, _| {
        if req.dispatch_kind() == DispatchKind::Forward {
            assert_eq!(req.request_uri(), Some("/app/b"));
        }
        Err(RequestError::Handler(anyhow::anyhow!("downstream failed")))
    });
    let dispatcher = Dispatcher::for_path("/app", "/b?y=2", failing);

    let err = dispatcher.forward(&mut req, &mut res).unwrap_err();
    assert_eq!(err.status(), 500);
    assert_eq!(view(&mut req), before);
    // A failed forward leaves the output open for the error page
    assert!(!res.output_closed);

    let err = dispatcher.include(&mut req, &mut res).unwrap_err();
    assert!(err.to_string().contains("downstream failed"));
    assert_eq!(view(&mut req), before);
}

#[test]
fn test_panicking_handler_restores() {
    let mut req = app_request(Method::GET, "/app/a?x=1");
    let mut res = RecordingResponse::default();
    let before = view(&mut req);

    let panicking = handler(|_, req, _| {
        req.set_attribute("partial", "yes");
        panic!("handler blew up");
    });
    let dispatcher = Dispatcher::for_path("/app", "/b?y=2", panicking);

    let outcome = catch_unwind(AssertUnwindSafe(|| dispatcher.forward(&mut req, &mut res)));
    assert!(outcome.is_err());
    assert_eq!(req.attributes().depth(), 0);
    assert_eq!(req.dispatch_kind(), DispatchKind::Request);
    req.remove_attribute("partial");
    assert_eq!(view(&mut req), before);

    let outcome = catch_unwind(AssertUnwindSafe(|| dispatcher.include(&mut req, &mut res)));
    assert!(outcome.is_err());
    req.remove_attribute("partial");
    assert_eq!(view(&mut req), before);
    assert_eq!(res.including, 0);
}

#[test]
fn test_error_dispatch_absorbs_bad_query() {
    // %E9 is not UTF-8, the default query encoding
    let mut req = app_request(Method::GET, "/app/a?n=%E9");
    let mut res = RecordingResponse::default();

    let called = Arc::new(Mutex::new(Vec::new()));
    let target = {
        let called = Arc::clone(&called);
        handler(move |_, req, _| {
            called.lock().push((
                req.dispatch_kind(),
                req.query_string().map(str::to_owned),
                req.parameter("code")?,
            ));
            Ok(())
        })
    };
    let dispatcher = Dispatcher::for_path("/app", "/error?code=500", target);

    dispatcher.error(&mut req, &mut res).unwrap();
    assert_eq!(
        *called.lock(),
        vec![(DispatchKind::Error, Some("code=500".to_string()), Some("500".to_string()))]
    );

    called.lock().clear();
    let err = dispatcher.forward(&mut req, &mut res).unwrap_err();
    assert_eq!(err.to_string(), "bad message 400: Bad query encoding");
    assert!(called.lock().is_empty());
    assert_eq!(req.request_uri(), Some("/app/a"));
    assert_eq!(req.query_string(), Some("n=%E9"));
    assert_eq!(req.dispatch_kind(), DispatchKind::Request);
    assert_eq!(req.attributes().depth(), 0);
}

#[test]
fn test_forward_on_committed_response_fails_untouched() {
    let mut req = app_request(Method::GET, "/app/a");
    let mut res = RecordingResponse {
        committed: true,
        ..RecordingResponse::default()
    };
    let before = view(&mut req);
    let target = handler(|_, _, _| panic!("must not be called"));

    let err = Dispatcher::for_path("/app", "/b", target)
        .forward(&mut req, &mut res)
        .unwrap_err();
    assert!(matches!(err, RequestError::IllegalState(_)));
    assert_eq!(view(&mut req), before);
}

#[test]
fn test_forward_output_closing() {
    let mut req = app_request(Method::GET, "/app/a");
    let mut res = RecordingResponse {
        mode: OutputMode::Writer,
        ..RecordingResponse::default()
    };
    Dispatcher::for_path("/app", "/b", handler(|_, _, _| Ok(())))
        .forward(&mut req, &mut res)
        .unwrap();
    assert_eq!(res.events, vec!["reset", "close_writer"]);

    let mut res = RecordingResponse::default();
    Dispatcher::for_path("/app", "/b", handler(|_, req, _| req.start_async()))
        .forward(&mut req, &mut res)
        .unwrap();
    assert_eq!(res.events, vec!["reset"]);
    assert!(!res.output_closed);
}

#[test]
fn test_relative_dispatcher_from_request() {
    let mut req = app_request(Method::GET, "/app/docs/page");
    req.set_handler_path(Some("/docs".to_string()));
    req.set_path_info(Some("/page".to_string()));
    let mut res = RecordingResponse::default();

    let seen = Arc::new(Mutex::new(None));
    let target = {
        let seen = Arc::clone(&seen);
        handler(move |target, req, _| {
            *seen.lock() = Some((target.to_string(), req.request_uri().map(str::to_owned)));
            Ok(())
        })
    };
    let dispatcher = req.request_dispatcher("img//logo", target).unwrap();
    dispatcher.forward(&mut req, &mut res).unwrap();

    assert_eq!(
        *seen.lock(),
        Some(("/docs/img/logo".to_string(), Some("/app/docs/img/logo".to_string())))
    );
    assert_eq!(req.handler_path(), Some("/docs"));
}

use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Clone, Debug)]
struct Cfg {
    enabled: bool,
    sample_n: u64,
    ua: bool,
    trust_forward: bool,
}

static CFG: Lazy<Cfg> = Lazy::new(|| Cfg {
    enabled: std::env::var("FLEET_ACCESS_LOG").ok().as_deref() == Some("1"),
    sample_n: std::env::var("FLEET_ACCESS_SAMPLE_N")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1)
        .max(1),
    ua: std::env::var("FLEET_ACCESS_UA").ok().as_deref() == Some("1"),
    trust_forward: std::env::var("FLEET_TRUST_FORWARD_HEADERS").ok().as_deref() == Some("1"),
});

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn first_forwarded_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let v = headers.get("x-forwarded-for")?.to_str().ok()?;
    let ip = v.split(',').next().unwrap_or("").trim();
    (!ip.is_empty()).then(|| ip.to_string())
}

fn access_line(
    method: &str,
    path: &str,
    status: u16,
    dur_ms: u64,
    remote: Option<String>,
    ua: Option<&str>,
) -> serde_json::Value {
    let mut obj = serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "method": method,
        "path": path,
        "status": status,
        "dur_ms": dur_ms,
    });
    if let Some(ip) = remote {
        obj["remote"] = serde_json::Value::String(ip);
    }
    if let Some(ua) = ua {
        obj["ua"] = serde_json::Value::String(ua.to_string());
    }
    obj
}

/// One JSON line per request on the `http.access` target. Request bodies
/// carry site credentials and are never logged.
pub async fn access_log_mw(req: Request<axum::body::Body>, next: Next) -> Response {
    if !CFG.enabled {
        return next.run(req).await;
    }
    let started = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let connect = req
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip().to_string());
    let remote = if CFG.trust_forward {
        first_forwarded_ip(req.headers()).or(connect)
    } else {
        connect
    };
    let ua = CFG
        .ua
        .then(|| {
            req.headers()
                .get(axum::http::header::USER_AGENT)
                .and_then(|h| h.to_str().ok())
                .map(str::to_string)
        })
        .flatten();
    let res = next.run(req).await;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    if CFG.sample_n > 1 && n % CFG.sample_n != 0 {
        return res;
    }
    let line = access_line(
        method.as_str(),
        &path,
        res.status().as_u16(),
        started.elapsed().as_millis() as u64,
        remote,
        ua.as_deref(),
    );
    tracing::info!(target: fleet_otel::ACCESS_TARGET, "{}", line);
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_line_shape() {
        let line = access_line(
            "POST",
            "/getPluginCommands",
            401,
            3,
            Some("10.0.0.7".into()),
            None,
        );
        assert_eq!(line["method"], "POST");
        assert_eq!(line["status"], 401);
        assert_eq!(line["remote"], "10.0.0.7");
        assert!(line.get("ua").is_none());
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(first_forwarded_ip(&headers), Some("203.0.113.9".into()));
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::{
    error::{FetchError, truncate_body},
    model::FetchedWeather,
};

use super::WeatherProvider;

/// Client for the WeatherStack `current` endpoint.
#[derive(Debug, Clone)]
pub struct WeatherStackProvider {
    api_key: String,
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl WeatherStackProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: Client::new(),
        }
    }

    fn current_url(&self) -> String {
        format!("{}/current", self.base_url)
    }
}

#[async_trait]
impl WeatherProvider for WeatherStackProvider {
    async fn fetch_current(&self, city: &str) -> Result<FetchedWeather, FetchError> {
        let res = self
            .http
            .get(self.current_url())
            .query(&[("access_key", self.api_key.as_str()), ("query", city)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = res.status().as_u16();
        let body = res.text().await.map_err(FetchError::Transport)?;

        classify_response(status, &body)
    }
}

/// Turn a raw HTTP response into a usable document or a per-city failure.
///
/// WeatherStack answers some logical failures (bad key, unknown city) with
/// `200 OK` and a top-level `error` object, so a success status alone is not
/// enough.
pub fn classify_response(status: u16, body: &str) -> Result<FetchedWeather, FetchError> {
    if !(200..300).contains(&status) {
        return Err(FetchError::HttpStatus {
            status,
            body: truncate_body(body),
        });
    }

    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Decode(format!("{e}: {}", truncate_body(body))))?;

    let Value::Object(map) = &parsed else {
        return Err(FetchError::Decode(format!(
            "expected a JSON object, got: {}",
            truncate_body(body)
        )));
    };

    if let Some(error) = map.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(FetchError::Api { code, info });
    }

    Ok(FetchedWeather {
        status_code: status,
        body: parsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Serve one canned response and hand back the request head.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            String::from_utf8_lossy(&head).into_owned()
        });

        (base_url, server)
    }

    #[tokio::test]
    async fn fetch_calls_current_endpoint_with_key_and_city() {
        let (base_url, server) = serve_once(r#"{"location":{"name":"London"}}"#).await;
        let provider = WeatherStackProvider::new("KEY".into(), base_url, Duration::from_secs(5));

        let fetched = provider.fetch_current("London").await.expect("fetch should succeed");
        let head = server.await.unwrap();
        let request_line = head.lines().next().unwrap_or_default();

        assert!(request_line.starts_with("GET /current?"), "{request_line}");
        assert!(request_line.contains("access_key=KEY"), "{request_line}");
        assert!(request_line.contains("query=London"), "{request_line}");
        assert_eq!(fetched.status_code, 200);
        assert_eq!(fetched.body["location"]["name"], "London");
    }

    #[tokio::test]
    async fn fetch_maps_embedded_error_to_api_error() {
        let (base_url, server) =
            serve_once(r#"{"success":false,"error":{"code":101,"info":"invalid key"}}"#).await;
        let provider = WeatherStackProvider::new("BAD".into(), base_url, Duration::from_secs(5));

        let err = provider.fetch_current("London").await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, FetchError::Api { code: 101, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out_as_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let provider = WeatherStackProvider::new("KEY".into(), base_url, Duration::from_millis(200));

        let err = provider.fetch_current("London").await.unwrap_err();

        match err {
            FetchError::Transport(e) => assert!(e.is_timeout(), "{e}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn success_body_is_returned_verbatim() {
        let body = r#"{"location":{"name":"London"},"current":{"temperature":7}}"#;
        let fetched = classify_response(200, body).expect("should succeed");
        assert_eq!(fetched.status_code, 200);
        assert_eq!(fetched.body["location"]["name"], "London");
    }

    #[test]
    fn non_success_status_is_http_error() {
        let err = classify_response(401, "Unauthorized").unwrap_err();
        match err {
            FetchError::HttpStatus { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "Unauthorized");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn embedded_error_with_ok_status_is_api_error() {
        let body = r#"{"success":false,"error":{"code":615,"type":"request_failed","info":"Your API request failed."}}"#;
        let err = classify_response(200, body).unwrap_err();
        match err {
            FetchError::Api { code, info } => {
                assert_eq!(code, 615);
                assert_eq!(info, "Your API request failed.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn embedded_error_without_info_falls_back_to_raw_value() {
        let err = classify_response(200, r#"{"error":"boom"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Api { code: 0, ref info } if info == "\"boom\""));
    }

    #[test]
    fn invalid_json_is_decode_error() {
        let err = classify_response(200, "<html>").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn non_object_json_is_decode_error() {
        let err = classify_response(200, "[1,2,3]").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let provider = WeatherStackProvider::new(
            "KEY".into(),
            "http://api.weatherstack.com/".into(),
            Duration::from_secs(10),
        );
        assert_eq!(provider.current_url(), "http://api.weatherstack.com/current");
    }
}

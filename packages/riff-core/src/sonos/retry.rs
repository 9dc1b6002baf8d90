//! Retry logic for transient SOAP errors.
//!
//! Write actions (SetAVTransportURI, Play, Seek...) can race a speaker that is
//! still switching sources. Those faults clear on their own, so they are
//! retried with a short exponential backoff.

use std::future::Future;
use std::time::Duration;

use super::soap::SoapResult;

/// Retry delays for transient SOAP errors (exponential backoff).
const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

/// Executes a SOAP request, retrying transient faults (701, 714, 716) and
/// timeouts after 200ms, 500ms and 1000ms.
///
/// The final error is returned unchanged once retries are exhausted.
pub(crate) async fn with_retry<T, F, Fut>(action: &str, mut operation: F) -> SoapResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SoapResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_transient() && attempt < RETRY_DELAYS_MS.len() => {
                let delay_ms = RETRY_DELAYS_MS[attempt];
                attempt += 1;
                log::warn!(
                    "[Sonos] {} transient error: {} (retry {}/{} in {}ms)",
                    action,
                    e,
                    attempt,
                    RETRY_DELAYS_MS.len(),
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sonos::soap::SoapError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_faults_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let out = with_retry("Play", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SoapError::Fault("UPnPError 701".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(out.ok(), Some("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_retries_with_last_error() {
        let calls = AtomicUsize::new(0);
        let out: SoapResult<()> = with_retry("Play", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(SoapError::Fault(format!("UPnPError 714 #{n}"))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match out {
            Err(SoapError::Fault(msg)) => assert!(msg.ends_with("#3")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let out: SoapResult<()> = with_retry("Play", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SoapError::Parse) }
        })
        .await;

        assert!(matches!(out, Err(SoapError::Parse)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

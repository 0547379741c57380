// Skip-control lookup
//
// Strategies run in order: exact selectors, then text/aria-label phrases,
// then a keyword scan over the whole document. The first visible match wins.
// The control often renders a moment after the ad starts, so the whole
// strategy list is retried a fixed number of times.

use std::time::Duration;

use super::dom::{ElementHandle, ElementQuery, PageDom};
use crate::error::log_action_error;

/// Exact selectors for the skip control, newest player markup first
pub const SKIP_SELECTORS: [&str; 3] = [
    ".ytp-ad-skip-button-modern",
    ".ytp-ad-skip-button",
    ".ytp-skip-ad-button",
];

pub const SKIP_PHRASES: [&str; 2] = ["skip ad", "skip"];

pub const SCAN_KEYWORD: &str = "skip";

pub fn skip_strategies() -> Vec<ElementQuery> {
    let mut strategies: Vec<ElementQuery> = SKIP_SELECTORS
        .iter()
        .map(|s| ElementQuery::Selector(s.to_string()))
        .collect();
    strategies.push(ElementQuery::TextOrLabel(
        SKIP_PHRASES.iter().map(|s| s.to_string()).collect(),
    ));
    strategies.push(ElementQuery::Scan(SCAN_KEYWORD.to_string()));
    strategies
}

/// One pass over every strategy.
pub async fn find_once(dom: &dyn PageDom, strategies: &[ElementQuery]) -> Option<ElementHandle> {
    for query in strategies {
        match dom.query(query).await {
            Ok(matches) => {
                if let Some(found) = matches.into_iter().find(|m| !m.rect.is_hidden()) {
                    log::debug!("[SkipLocator] Found control via {:?}", query);
                    return Some(found);
                }
            }
            Err(err) => log_action_error(&err, "skip_lookup"),
        }
    }
    None
}

/// Retry `find_once` up to `attempts` times, sleeping `delay` between
/// attempts but not after the last one.
pub async fn locate(
    dom: &dyn PageDom,
    strategies: &[ElementQuery],
    attempts: u32,
    delay: Duration,
) -> Option<ElementHandle> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(found) = find_once(dom, strategies).await {
            return Some(found);
        }
        if attempt < attempts {
            log::debug!(
                "[SkipLocator] Attempt {}/{} found nothing, retrying in {:?}",
                attempt,
                attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::dom::Rect;
    use crate::testing::FakePage;

    #[tokio::test]
    async fn test_selector_strategy_wins_over_text() {
        let page = FakePage::new();
        let by_text = page.add_labelled(Rect::new(0.0, 0.0, 10.0, 10.0));
        let by_class = page.add_selector(".ytp-ad-skip-button", Rect::new(100.0, 50.0, 40.0, 20.0));

        let found = find_once(&page, &skip_strategies()).await.unwrap();
        assert_eq!(found.id, by_class.id);
        assert_ne!(found.id, by_text.id);
    }

    #[tokio::test]
    async fn test_hidden_matches_are_skipped() {
        let page = FakePage::new();
        page.add_selector(".ytp-ad-skip-button-modern", Rect::new(0.0, 0.0, 0.0, 0.0));
        let visible = page.add_selector(".ytp-skip-ad-button", Rect::new(5.0, 5.0, 10.0, 10.0));

        let found = find_once(&page, &skip_strategies()).await.unwrap();
        assert_eq!(found.id, visible.id);
    }

    #[tokio::test]
    async fn test_scan_is_last_resort() {
        let page = FakePage::new();
        let scanned = page.add_scanned(Rect::new(1.0, 1.0, 2.0, 2.0));
        let found = find_once(&page, &skip_strategies()).await.unwrap();
        assert_eq!(found.id, scanned.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_misses_take_two_delays() {
        let page = FakePage::new();
        let started = tokio::time::Instant::now();
        let found = locate(&page, &skip_strategies(), 3, Duration::from_millis(500)).await;
        assert!(found.is_none());
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(page.query_passes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_render_is_found_on_retry() {
        let page = FakePage::new();
        page.reveal_selector_after(".ytp-ad-skip-button-modern", Rect::new(0.0, 0.0, 30.0, 12.0), 2);
        let found = locate(&page, &skip_strategies(), 3, Duration::from_millis(500)).await;
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_query_errors_fall_through_to_next_strategy() {
        let page = FakePage::new();
        page.fail_queries_for(ElementQuery::Selector(".ytp-ad-skip-button-modern".to_string()));
        let target = page.add_selector(".ytp-ad-skip-button", Rect::new(0.0, 0.0, 30.0, 12.0));
        let found = find_once(&page, &skip_strategies()).await.unwrap();
        assert_eq!(found.id, target.id);
    }
}

use std::sync::Arc;

use super::fetcher::DocumentFetcher;
use super::parser::ParserRegistry;
use super::session::{FeedOptions, FeedSession, SessionError};

/// Builds a session for `options`, choosing its parser.
///
/// # Arguments
///
/// * `options` - Feed URL, interval, store and HTTP settings
/// * `reader` - Registry name of the parser, or `None` to autodetect
/// * `registry` - Parsers to resolve by name or try in order
/// * `fetcher` - HTTP collaborator, also kept by the session
///
/// # Returns
///
/// A session that is not started yet. Call [`FeedSession::start`] to restore
/// state and arm the timer.
///
/// # Behavior
///
/// - With `reader` set, no request is made; an unknown name is
///   [`SessionError::UnknownReader`]
/// - Without it, the document is fetched once and each parser is asked in
///   registration order; the first that accepts wins
/// - If none accepts, [`SessionError::Detection`] lists every parser's reason
pub async fn create_feed(
    options: FeedOptions,
    reader: Option<&str>,
    registry: &ParserRegistry,
    fetcher: Arc<dyn DocumentFetcher>,
) -> Result<Arc<FeedSession>, SessionError> {
    let parser = match reader {
        Some(name) => registry
            .resolve(name)
            .ok_or_else(|| SessionError::UnknownReader(name.to_string()))?,
        None => {
            let request = options.fetch_request()?;
            let document = fetcher.fetch(&request).await?;
            let parser = registry
                .detect(&document.body, &document.content_type)
                .map_err(|reasons| SessionError::Detection {
                    url: options.url.clone(),
                    reasons,
                })?;
            tracing::info!(
                feed = %options.url,
                parser = %parser.name(),
                content_type = %document.content_type,
                "Autodetected feed format"
            );
            parser
        }
    };

    Ok(Arc::new(FeedSession::new(options, parser, fetcher)?))
}

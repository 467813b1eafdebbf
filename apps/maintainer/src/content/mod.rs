// Content processing: protection/restoration of media, sanitization,
// completeness checks, staleness heuristics and the critic loop.
// Generation calls go through llm_client — nothing here talks to a provider directly.

pub mod completeness;
pub mod critic;
pub mod extract;
pub mod protection;
pub mod sanitize;
pub mod staleness;

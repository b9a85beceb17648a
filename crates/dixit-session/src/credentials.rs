//! Credentials carried on the WebSocket upgrade request.
//!
//! Browsers cannot set headers on a WebSocket handshake, so clients put
//! everything in the query string:
//!
//! ```text
//! ws://host/ws?player_id=5b0c…&player_name=Alice&token=…
//! ```

/// Raw, unvalidated credentials decoded from a query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// A previously issued participant id, used to resume an identity.
    pub player_id: Option<String>,
    /// Requested display name.
    pub player_name: Option<String>,
    /// Bearer token for authenticated players.
    pub token: Option<String>,
}

impl Credentials {
    /// Decodes credentials from a query string (without the leading `?`).
    ///
    /// Unknown keys are ignored, empty values count as absent and the last
    /// occurrence of a repeated key wins.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut creds = Self::default();
        let Some(query) = query else {
            return creds;
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "player_id" => &mut creds.player_id,
                "player_name" => &mut creds.player_name,
                "token" => &mut creds.token,
                _ => continue,
            };
            *slot = Some(value.to_owned());
        }
        creds
    }
}

//! Inline HTML pages for the OAuth popup.
//!
//! The connect flow runs in a popup window; every outcome renders a small
//! page that messages the opener via `postMessage` and (except for the
//! resource picker) closes itself.

use crate::platform::{Platform, Resource};
use axum::response::Html;

const STYLE: &str = r#"
  body { font-family: -apple-system, sans-serif; background: #f6f7f9;
         display: flex; justify-content: center; padding-top: 10vh; }
  .card { background: #fff; border-radius: 12px; padding: 32px 40px;
          box-shadow: 0 2px 12px rgba(0,0,0,0.08); max-width: 420px; }
  h2 { margin-top: 0; }
  ul { list-style: none; padding: 0; }
  li { margin: 8px 0; }
  a.pick { display: block; padding: 12px 16px; border: 1px solid #d6d9de;
           border-radius: 8px; text-decoration: none; color: #1a1d21; }
  a.pick:hover { background: #eef2ff; border-color: #6473ff; }
  p.err { color: #b42318; }
"#;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn notify_script(platform: &str, success: bool) -> String {
    format!(
        r#"<script>
  if (window.opener) {{
    window.opener.postMessage({{ type: 'oauth-result', platform: '{}', success: {} }}, '*');
  }}
  setTimeout(function() {{ window.close(); }}, 1500);
</script>"#,
        platform, success
    )
}

/// Connection succeeded; names the linked resource and closes the popup.
pub fn success_page(platform: Platform, resource_name: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html><head><title>{name} Connected</title><style>{STYLE}</style></head>
<body><div class="card">
  <h2>{name} connected</h2>
  <p><strong>{resource}</strong> is now linked. You can close this window.</p>
</div>
{script}
</body></html>"#,
        name = platform.display_name(),
        resource = escape(resource_name),
        script = notify_script(platform.as_str(), true),
    ))
}

/// Connection failed; shows the error and closes the popup.
pub fn error_page(platform_label: &str, message: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html><head><title>Connection Failed</title><style>{STYLE}</style></head>
<body><div class="card">
  <h2>Connection failed</h2>
  <p class="err">{message}</p>
  <p>Close this window and try again.</p>
</div>
{script}
</body></html>"#,
        message = escape(message),
        script = notify_script(platform_label, false),
    ))
}

/// More than one eligible resource: the user picks one, which resubmits the
/// callback with `resource_id` (and the already-exchanged `user_token`, so
/// the code is not exchanged twice).
pub fn selector_page(
    platform: Platform,
    resources: &[Resource],
    callback_url: &str,
    state: &str,
    user_token: &str,
) -> Html<String> {
    let items: String = resources
        .iter()
        .map(|r| {
            let href = format!(
                "{}?state={}&resource_id={}&user_token={}",
                callback_url,
                urlencoding::encode(state),
                urlencoding::encode(&r.id),
                urlencoding::encode(user_token),
            );
            format!(
                r#"    <li><a class="pick" href="{}">{}</a></li>"#,
                escape(&href),
                escape(&r.name)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Html(format!(
        r#"<!DOCTYPE html>
<html><head><title>Choose a {noun}</title><style>{STYLE}</style></head>
<body><div class="card">
  <h2>Choose a {noun}</h2>
  <p>Your {name} account manages more than one. Pick the one to post through:</p>
  <ul>
{items}
  </ul>
</div>
</body></html>"#,
        noun = platform.resource_noun(),
        name = platform.display_name(),
        items = items,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_page_contents() {
        let Html(body) = success_page(Platform::Facebook, "My Bakery");
        assert!(body.contains("Facebook connected"));
        assert!(body.contains("My Bakery"));
        assert!(body.contains("success: true"));
        assert!(body.contains("postMessage"));
    }

    #[test]
    fn test_error_page_escapes_message() {
        let Html(body) = error_page("facebook", "<script>alert(1)</script>");
        assert!(!body.contains("<script>alert"));
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("success: false"));
    }

    #[test]
    fn test_selector_page_lists_resources_with_links() {
        let resources = vec![
            Resource::new("p1", "Page One"),
            Resource::new("p2", "Page Two"),
        ];
        let Html(body) = selector_page(
            Platform::Facebook,
            &resources,
            "http://localhost/api/auth/facebook/callback",
            "biz-1",
            "tok-abc",
        );

        assert!(body.contains("Page One"));
        assert!(body.contains("Page Two"));
        assert!(body.contains("resource_id=p1"));
        assert!(body.contains("resource_id=p2"));
        assert!(body.contains("user_token=tok-abc"));
        assert!(body.contains("state=biz-1"));
        // Picker does not close the popup
        assert!(!body.contains("postMessage"));
    }
}

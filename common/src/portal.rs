//! Configuration portal model shared by the device and host HTTP bindings.

use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::{BrokerConfig, NetworkCredentials, PersistedConfig},
    topics::TopicList,
};

pub const MAX_FORM_BYTES: usize = 2048;

/// Paths operating systems probe to detect a captive portal.
pub const CAPTIVE_PORTAL_PATHS: [&str; 6] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

pub const CONFIG_FORM_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Relay Node Setup</title>
  <style>
    body{font-family:Arial,sans-serif;max-width:560px;margin:2rem auto;padding:0 1rem;color:#111}
    .card{border:1px solid #ddd;border-radius:10px;padding:1rem;margin-bottom:1rem}
    label{display:block;margin:.5rem 0 .2rem}
    input[type=text],input[type=password]{width:100%;padding:.5rem;box-sizing:border-box}
    .muted{color:#555}
    button{padding:.55rem .9rem;margin-top:.8rem}
  </style>
</head>
<body>
  <h1>Relay Node Setup</h1>
  <p class="muted">Settings are applied after the device restarts.</p>
  <form method="post" action="/submit">
    <div class="card">
      <h2>WiFi</h2>
      <label>SSID</label><input name="ssid" type="text" required>
      <label>Password</label><input name="password" type="password" required>
    </div>
    <div class="card">
      <h2>Broker</h2>
      <label>Address (host:port)</label><input name="broker" type="text" placeholder="192.168.1.10:1883" required>
      <label><input name="anonymous" type="checkbox" checked> Anonymous</label>
      <label>Username (required unless anonymous)</label><input name="username" type="text">
      <label>Password (required unless anonymous)</label><input name="broker_password" type="password">
      <label>Topics (telemetry:actuatorA:actuatorB:display)</label><input name="topics" type="text" placeholder="temp:lamp:fan:msg">
    </div>
    <button type="submit">Save</button>
  </form>
</body>
</html>
"#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("broker address must be host:port with a port between 1 and 65535")]
    InvalidEndpoint,
    #[error("malformed form encoding")]
    Encoding,
    #[error("form body exceeds {MAX_FORM_BYTES} bytes")]
    TooLarge,
}

/// Raw portal submission. Field names match the HTML form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConfigForm {
    pub ssid: String,
    pub password: String,
    pub broker: String,
    /// Checkbox value, empty when unchecked.
    pub anonymous: String,
    pub username: String,
    pub broker_password: String,
    pub topics: String,
}

impl ConfigForm {
    pub fn from_urlencoded(body: &str) -> Result<Self, FormError> {
        if body.len() > MAX_FORM_BYTES {
            return Err(FormError::TooLarge);
        }
        serde_urlencoded::from_str(body).map_err(|_| FormError::Encoding)
    }

    pub fn is_anonymous(&self) -> bool {
        !self.anonymous.is_empty()
    }

    pub fn into_config(self) -> Result<PersistedConfig, FormError> {
        let anonymous = self.is_anonymous();
        let ssid = self.ssid.trim().to_string();
        let topics = self.topics.trim();

        if ssid.is_empty() {
            return Err(FormError::MissingField("SSID"));
        }
        if self.password.is_empty() {
            return Err(FormError::MissingField("WiFi password"));
        }

        let mut broker = BrokerConfig {
            anonymous,
            username: self.username.trim().to_string(),
            password: self.broker_password,
            ..BrokerConfig::default()
        };
        broker.set_endpoint(&self.broker);
        if broker.host.is_empty() || broker.port.is_none() {
            return Err(FormError::InvalidEndpoint);
        }

        if !anonymous {
            if broker.username.is_empty() {
                return Err(FormError::MissingField("broker username"));
            }
            if broker.password.is_empty() {
                return Err(FormError::MissingField("broker password"));
            }
            if topics.is_empty() {
                return Err(FormError::MissingField("topics"));
            }
        }

        Ok(PersistedConfig {
            network: NetworkCredentials {
                ssid,
                passphrase: self.password,
            },
            broker,
            topics: TopicList::parse(topics),
        })
    }
}

pub fn render_confirmation(config: &PersistedConfig) -> String {
    let access = if config.broker.anonymous {
        "anonymous".to_string()
    } else {
        format!("user {}", html_escape(&config.broker.username))
    };

    page(&format!(
        "<h1>Configuration saved</h1>\
         <p>WiFi: {ssid} (password {mask})</p>\
         <p>Broker: {endpoint}, {access}</p>\
         <p>Topics: {topics}</p>\
         <p><strong>Restart the device to apply the new settings.</strong></p>",
        ssid = html_escape(&config.network.ssid),
        mask = mask(&config.network.passphrase),
        endpoint = html_escape(&config.broker.endpoint()),
        topics = html_escape(&config.topics.to_wire()),
    ))
}

pub fn render_form_error(err: &FormError) -> String {
    page(&format!(
        "<h1>Configuration rejected</h1><p>{}</p><p><a href=\"/\">Back</a></p>",
        html_escape(&err.to_string())
    ))
}

fn page(body: &str) -> String {
    format!(
        "<!doctype html><html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>Relay Node Setup</title></head><body>{body}</body></html>"
    )
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "not set"
    } else {
        "********"
    }
}

fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

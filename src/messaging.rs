//! WhatsApp turn announcements.
use once_cell::sync::Lazy;
use reqwest::Url;

use crate::model::{Caddie, ListNumber};

static SHARE_BASE: Lazy<Url> =
    Lazy::new(|| Url::parse("https://wa.me/").expect("valid share URL"));

pub const EMPTY_QUEUE: &str = "⛳ *Turno Actual* - No hay caddies disponibles en esta lista";

/// Announcement for the caddie at the head of a projected queue.
pub fn announcement(list: ListNumber, queue: &[&Caddie]) -> String {
    match queue.first() {
        Some(next) => format!(
            "⛳ *Turno Actual Lista {}*: Va el caddie {} 👍",
            list, next.name
        ),
        None => EMPTY_QUEUE.to_string(),
    }
}

/// A `wa.me` share link carrying `text`.
pub fn whatsapp_link(text: &str) -> Url {
    let mut url = SHARE_BASE.clone();
    url.query_pairs_mut().append_pair("text", text);
    url
}

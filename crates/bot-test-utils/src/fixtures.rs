//! Inbound frames and configuration fixtures.
//!
//! Data channel frames are objects keyed by `m`; lobby frames are arrays
//! whose first element is a string tag.

use serde_json::{json, Value};
use std::collections::HashMap;

/// `{"m":51}` - the server's challenge.
#[must_use]
pub fn challenge() -> Value {
    json!({"m": 51})
}

/// `{"m":1,"f":[{"p":id,"n":name},...]}`
#[must_use]
pub fn roster(entries: &[(&str, &str)]) -> Value {
    let contacts: Vec<Value> = entries
        .iter()
        .map(|(id, name)| json!({"p": id, "n": name}))
        .collect();
    json!({"m": 1, "f": contacts})
}

/// `{"m":35,"a":ip,"p":inviter_id,"s":token}`
#[must_use]
pub fn invitation(ip: &str, inviter_id: &str, token: Value) -> Value {
    json!({"m": 35, "a": ip, "p": inviter_id, "s": token})
}

#[must_use]
pub fn countdown() -> Value {
    json!(["5"])
}

#[must_use]
pub fn race_over() -> Value {
    json!(["7"])
}

/// `["13",1,delay,killer,power_up,0,hit_type]` - the bot died.
#[must_use]
pub fn death(respawn_delay: i64, killer_id: i64, power_up: i64, hit_type: i64) -> Value {
    json!(["13", 1, respawn_delay, killer_id, power_up, 0, hit_type])
}

#[must_use]
pub fn ping(payload: Value) -> Value {
    json!(["16", payload])
}

/// `["17", raw]` - raw server clock, divided by 1e6 on receipt.
#[must_use]
pub fn clock(raw: i64) -> Value {
    json!(["17", raw])
}

/// `["18",1,x,y,vx,vy]` - movement the bot should mirror.
#[must_use]
pub fn movement(x: Value, y: Value, vx: Value, vy: Value) -> Value {
    json!(["18", 1, x, y, vx, vy])
}

#[must_use]
pub fn race_finished() -> Value {
    json!(["28"])
}

#[must_use]
pub fn quick_race(enabled: bool) -> Value {
    json!(["30", i32::from(enabled)])
}

#[must_use]
pub fn quick_race_end() -> Value {
    json!(["35"])
}

#[must_use]
pub fn join(counter: i64) -> Value {
    json!(["39", counter])
}

/// Minimal environment for `Config::from_vars`.
#[must_use]
pub fn base_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("BOT_EMAIL".to_string(), "bot@example.com".to_string()),
        ("BOT_PASSWORD".to_string(), "test-password".to_string()),
    ])
}

/// Environment pointing both channels at local mock servers.
#[must_use]
pub fn local_config_vars(data_port: u16, lobby_port: u16) -> HashMap<String, String> {
    let mut vars = base_config_vars();
    vars.insert("BOT_GAME_HOST".to_string(), "127.0.0.1".to_string());
    vars.insert("BOT_DATA_PORT".to_string(), data_port.to_string());
    vars.insert("BOT_LOBBY_PORT".to_string(), lobby_port.to_string());
    vars.insert("BOT_CONNECT_TIMEOUT_SECONDS".to_string(), "2".to_string());
    vars
}

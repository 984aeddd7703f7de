//! Mint a session token for an existing business, signed with
//! `SHIFTD_JWT_SECRET`.
//!
//!     shiftd-token <business_id> <admin|manager|employee> [user_id]

use ulid::Ulid;

use shiftd::config::Config;
use shiftd::identity::{Identity, JwtIdentity};
use shiftd::model::Role;

const USAGE: &str = "usage: shiftd-token <business_id> <admin|manager|employee> [user_id]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (business, role, user) = match args.as_slice() {
        [business, role] => (business, role, None),
        [business, role, user] => (business, role, Some(user)),
        _ => return Err(USAGE.into()),
    };

    let role = match role.to_lowercase().as_str() {
        "admin" | "manager" | "employee" => Role::from_claim(role),
        other => return Err(format!("unknown role {other:?}\n{USAGE}").into()),
    };
    let identity = Identity {
        business_id: Ulid::from_string(business)?,
        user_id: match user {
            Some(u) => Ulid::from_string(u)?,
            None => Ulid::new(),
        },
        role,
    };

    let config = Config::from_env()?;
    let token = JwtIdentity::new(config.jwt_secret.as_bytes()).mint(&identity, config.token_ttl)?;
    eprintln!("user {} ({role}) in business {}", identity.user_id, identity.business_id);
    println!("{token}");
    Ok(())
}

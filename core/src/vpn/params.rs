//! Typed VPN requests, validated before any job is created.

use std::sync::LazyLock;

use rand::Rng;
use rand::rng;
use rand::seq::SliceRandom;
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::config::DEFAULT_GROUP;
use crate::error::OpsErr;
use crate::error::Result;
use crate::operation::parse_params;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const GENERATED_PASSWORD_LEN: usize = 8;
const MIN_PASSWORD_LEN: usize = 8;
const PASSWORD_RULE: &str = "password must be at least 8 characters with upper case, lower case and digits";

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddUser {
    pub vpn_user: String,
    pub group: String,
    pub password: String,
    pub description: String,
    pub mail: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchUser {
    pub description: String,
}

/// How the account to modify is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSelector {
    Name(String),
    /// Resolved through a search; only an exact description match counts.
    Description(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyPassword {
    pub target: UserSelector,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyStatus {
    pub target: UserSelector,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteUsers {
    pub users: Vec<String>,
    pub remote_firewall: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnRequest {
    AddUser(AddUser),
    SearchUser(SearchUser),
    ModifyPassword(ModifyPassword),
    ModifyStatus(ModifyStatus),
    DeleteUsers(DeleteUsers),
}

impl VpnRequest {
    /// Parse and validate `params` for `operation`.
    pub fn parse(operation: &str, params: Value, known_groups: &[String]) -> Result<Self> {
        match operation {
            "add_user" => parse_add_user(parse_params(params)?, known_groups).map(Self::AddUser),
            "search_user" => {
                let raw: RawSearchUser = parse_params(params)?;
                let description = required("description", &raw.description)?;
                Ok(Self::SearchUser(SearchUser { description }))
            }
            "modify_password" => {
                let raw: RawModifyPassword = parse_params(params)?;
                let target = selector(&raw.vpn_user, &raw.description)?;
                let password = password_or_generated(&raw.passwd)?;
                Ok(Self::ModifyPassword(ModifyPassword { target, password }))
            }
            "modify_status" => {
                let raw: RawModifyStatus = parse_params(params)?;
                let target = selector(&raw.vpn_user, &raw.description)?;
                let status = match raw.status.trim() {
                    "" => "enabled",
                    status => status,
                };
                Ok(Self::ModifyStatus(ModifyStatus {
                    target,
                    enabled: status_enables(status),
                }))
            }
            "delete_users" => {
                let raw: RawDeleteUsers = parse_params(params)?;
                let users = [raw.vpn_users, raw.vpn_user, raw.vpn_users_text]
                    .into_iter()
                    .flatten()
                    .map(UserList::normalize)
                    .find(|users| !users.is_empty())
                    .ok_or_else(|| OpsErr::InvalidRequest("vpn_users is required".to_string()))?;
                for user in &users {
                    token("vpn_users", user)?;
                }
                Ok(Self::DeleteUsers(DeleteUsers {
                    users,
                    remote_firewall: raw.remote_firewall.is_some_and(|flag| flag.enabled()),
                }))
            }
            // Includes `export_excel`, which the appliance cannot do.
            other => Err(OpsErr::Unsupported {
                system: "vpn".to_string(),
                operation: other.to_string(),
            }),
        }
    }

    pub fn operation_name(&self) -> &'static str {
        match self {
            VpnRequest::AddUser(_) => "add_user",
            VpnRequest::SearchUser(_) => "search_user",
            VpnRequest::ModifyPassword(_) => "modify_password",
            VpnRequest::ModifyStatus(_) => "modify_status",
            VpnRequest::DeleteUsers(_) => "delete_users",
        }
    }

    pub fn wants_firewall(&self) -> bool {
        matches!(self, VpnRequest::DeleteUsers(DeleteUsers { remote_firewall: true, .. }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAddUser {
    vpn_user: String,
    section: String,
    passwd: String,
    description: String,
    mail: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSearchUser {
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawModifyPassword {
    vpn_user: String,
    description: String,
    passwd: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawModifyStatus {
    vpn_user: String,
    description: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDeleteUsers {
    vpn_users: Option<UserList>,
    vpn_user: Option<UserList>,
    vpn_users_text: Option<UserList>,
    remote_firewall: Option<Flag>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserList {
    Text(String),
    Many(Vec<String>),
}

impl UserList {
    fn normalize(self) -> Vec<String> {
        match self {
            UserList::Text(text) => normalize_users(&text),
            UserList::Many(items) => items.iter().flat_map(|item| normalize_users(item)).collect(),
        }
    }
}

/// Forms send booleans as `true`, `"true"` or `"1"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
    Number(i64),
}

impl Flag {
    fn enabled(&self) -> bool {
        match self {
            Flag::Bool(value) => *value,
            Flag::Text(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            Flag::Number(n) => *n != 0,
        }
    }
}

fn parse_add_user(raw: RawAddUser, known_groups: &[String]) -> Result<AddUser> {
    let vpn_user = raw.vpn_user.trim().to_string();
    let description = raw.description.trim().to_string();
    let mail = raw.mail.trim().to_string();
    let status = raw.status.trim().to_string();
    if vpn_user.is_empty() || description.is_empty() || mail.is_empty() || status.is_empty() {
        return Err(OpsErr::InvalidRequest(
            "vpn_user, description, mail and status are required".to_string(),
        ));
    }
    token("vpn_user", &vpn_user)?;
    if !is_valid_email(&mail) {
        return Err(OpsErr::InvalidRequest(format!("invalid mail address `{mail}`")));
    }
    Ok(AddUser {
        vpn_user,
        group: normalize_group(&raw.section, known_groups),
        password: password_or_generated(&raw.passwd)?,
        description,
        mail,
        enabled: status_enables(&status),
    })
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(OpsErr::InvalidRequest(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Values spliced into appliance commands must be single tokens.
fn token(field: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        return Err(OpsErr::InvalidRequest(format!(
            "{field} must not contain spaces or quotes"
        )));
    }
    Ok(())
}

fn selector(vpn_user: &str, description: &str) -> Result<UserSelector> {
    let description = description.trim();
    if !description.is_empty() {
        return Ok(UserSelector::Description(description.to_string()));
    }
    let name = required("vpn_user or description", vpn_user)?;
    token("vpn_user", &name)?;
    Ok(UserSelector::Name(name))
}

fn password_or_generated(passwd: &str) -> Result<String> {
    let password = match passwd.trim() {
        "" => random_password(),
        given => given.to_string(),
    };
    if !is_strong_password(&password) {
        return Err(OpsErr::InvalidRequest(PASSWORD_RULE.to_string()));
    }
    Ok(password)
}

pub(crate) fn status_enables(status: &str) -> bool {
    matches!(status.trim().to_ascii_lowercase().as_str(), "enabled" | "enable" | "no")
}

pub(crate) fn is_valid_email(mail: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(mail.trim()))
}

pub(crate) fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
        && !password.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"')
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Eight characters with at least one upper case letter, one lower case
/// letter and one digit.
pub fn random_password() -> String {
    let mut rng = rng();
    let any: Vec<u8> = [LOWER, UPPER, DIGITS].concat();
    let mut out = vec![
        LOWER[rng.random_range(0..LOWER.len())],
        UPPER[rng.random_range(0..UPPER.len())],
        DIGITS[rng.random_range(0..DIGITS.len())],
    ];
    while out.len() < GENERATED_PASSWORD_LEN {
        out.push(any[rng.random_range(0..any.len())]);
    }
    out.shuffle(&mut rng);
    String::from_utf8_lossy(&out).into_owned()
}

/// Split on `,` `;` `/` and drop any `@domain` part.
pub(crate) fn normalize_users(text: &str) -> Vec<String> {
    text.split([',', ';', '/'])
        .map(|part| part.split('@').next().unwrap_or_default().trim())
        .filter(|user| !user.is_empty())
        .map(str::to_string)
        .collect()
}

/// `X` becomes `X` or `X^root` when the appliance knows it, anything else
/// lands in the default group.
pub(crate) fn normalize_group(section: &str, known_groups: &[String]) -> String {
    let section = section.trim();
    if section.is_empty() {
        return DEFAULT_GROUP.to_string();
    }
    let known = |candidate: &str| known_groups.iter().any(|group| group.trim() == candidate);
    if known(section) {
        return section.to_string();
    }
    let rooted = format!("{section}^root");
    if known(&rooted) {
        return rooted;
    }
    DEFAULT_GROUP.to_string()
}

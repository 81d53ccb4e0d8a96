//! Microsoft Teams handlers.

use std::sync::Arc;

use {
    async_trait::async_trait,
    outlook_graph::{GraphQuery, Method},
    serde::{Deserialize, Deserializer, de},
    serde_json::{Value, json},
};

use crate::{
    context::{Failure, Operation, ToolContext, parse_args},
    tool::{Tool, ToolOutput},
};

pub const MAX_RESULT_COUNT: u32 = 50;
const DEFAULT_TEAM_COUNT: u32 = 25;
const DEFAULT_MESSAGE_COUNT: u32 = 20;

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, Failure> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Failure::InvalidArgs(format!("{name} is required")))
}

fn check_count(count: u32) -> Result<u32, Failure> {
    if count > MAX_RESULT_COUNT {
        return Err(Failure::InvalidArgs(format!(
            "Count cannot exceed {MAX_RESULT_COUNT}"
        )));
    }
    if count == 0 {
        return Err(Failure::InvalidArgs("Count must be at least 1".into()));
    }
    Ok(count)
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

fn str_or_empty(v: &Value, key: &str) -> Value {
    v.get(key).cloned().filter(|x| !x.is_null()).unwrap_or(json!(""))
}

fn bool_or_false(v: &Value, key: &str) -> Value {
    v.get(key).cloned().filter(Value::is_boolean).unwrap_or(json!(false))
}

/// Accept any whole JSON number for `count`; hosts often send `5.0`.
fn whole_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let Some(n) = Option::<f64>::deserialize(d)? else {
        return Ok(None);
    };
    if n.fract() != 0.0 || n < 0.0 || n > f64::from(u32::MAX) {
        return Err(de::Error::custom(format!("count must be a whole number, got {n}")));
    }
    Ok(Some(n as u32))
}

// ── teams-list-teams ────────────────────────────────────────────────────────

pub struct ListTeams {
    ctx: Arc<ToolContext>,
}

impl ListTeams {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
struct ListTeamsArgs {
    #[serde(default, deserialize_with = "whole_count")]
    count: Option<u32>,
}

fn team_summary(team: &Value) -> Value {
    let settings = team.get("memberSettings").unwrap_or(&Value::Null);
    json!({
        "id": team["id"],
        "displayName": team["displayName"],
        "description": str_or_empty(team, "description"),
        "webUrl": team["webUrl"],
        "isArchived": bool_or_false(team, "isArchived"),
        "visibility": team["visibility"],
        "createdDateTime": team["createdDateTime"],
        "memberSettings": {
            "allowCreatePrivateChannels": settings["allowCreatePrivateChannels"],
            "allowCreateUpdateChannels": settings["allowCreateUpdateChannels"],
            "allowDeleteChannels": settings["allowDeleteChannels"],
        },
    })
}

impl ListTeams {
    async fn run(&self, args: Value) -> Result<Value, Failure> {
        let args: ListTeamsArgs = parse_args(args)?;
        let count = check_count(args.count.unwrap_or(DEFAULT_TEAM_COUNT))?;
        let query = GraphQuery::new().param("$top", count);
        let resp = self
            .ctx
            .call(Method::GET, "me/joinedTeams", None, &query)
            .await?;
        let teams: Vec<Value> = resp
            .items()
            .unwrap_or_default()
            .iter()
            .map(team_summary)
            .collect();
        Ok(json!({
            "success": true,
            "count": teams.len(),
            "teams": teams,
        }))
    }
}

#[async_trait]
impl Tool for ListTeams {
    fn name(&self) -> &str {
        "teams-list-teams"
    }

    fn description(&self) -> &str {
        "Lists all Microsoft Teams that the user has access to"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "count": {
                    "type": "integer",
                    "description": "Number of teams to retrieve (default: 25, max: 50)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolOutput> {
        let op = Operation {
            action: "list teams",
            scope: "Team.ReadBasic.All",
            not_found: None,
            invalid: None,
        };
        Ok(match self.run(args).await {
            Ok(body) => ToolOutput::json(&body),
            Err(failure) => op.output(failure, json!({})),
        })
    }
}

// ── teams-list-channels ─────────────────────────────────────────────────────

pub struct ListChannels {
    ctx: Arc<ToolContext>,
}

impl ListChannels {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListChannelsArgs {
    team_id: Option<String>,
    channel_type: Option<String>,
}

const CHANNEL_TYPES: &[&str] = &["standard", "private", "shared"];

fn channel_summary(channel: &Value) -> Value {
    json!({
        "id": channel["id"],
        "displayName": channel["displayName"],
        "description": str_or_empty(channel, "description"),
        "webUrl": channel["webUrl"],
        "membershipType": channel["membershipType"],
        "createdDateTime": channel["createdDateTime"],
        "isFavoriteByDefault": bool_or_false(channel, "isFavoriteByDefault"),
        "email": str_or_empty(channel, "email"),
    })
}

impl ListChannels {
    async fn run(&self, args: &ListChannelsArgs) -> Result<Value, Failure> {
        let team_id = require(&args.team_id, "teamId")?;
        let mut query = GraphQuery::new();
        if let Some(kind) = args.channel_type.as_deref().filter(|k| !k.is_empty()) {
            if !CHANNEL_TYPES.contains(&kind) {
                return Err(Failure::InvalidArgs(format!(
                    "channelType must be one of {}",
                    CHANNEL_TYPES.join(", ")
                )));
            }
            query.push("$filter", format!("membershipType eq '{kind}'"));
        }
        let path = format!("teams/{}/channels", segment(team_id));
        let resp = self.ctx.call(Method::GET, &path, None, &query).await?;
        let channels: Vec<Value> = resp
            .items()
            .unwrap_or_default()
            .iter()
            .map(channel_summary)
            .collect();
        Ok(json!({
            "success": true,
            "teamId": team_id,
            "count": channels.len(),
            "channels": channels,
        }))
    }
}

#[async_trait]
impl Tool for ListChannels {
    fn name(&self) -> &str {
        "teams-list-channels"
    }

    fn description(&self) -> &str {
        "Lists channels in a specific Microsoft Team"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "teamId": {
                    "type": "string",
                    "description": "ID of the team to list channels for"
                },
                "channelType": {
                    "type": "string",
                    "description": "Filter by channel type (standard, private, shared)",
                    "enum": CHANNEL_TYPES
                }
            },
            "required": ["teamId"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolOutput> {
        let mut op = Operation {
            action: "list channels",
            scope: "Channel.ReadBasic.All",
            not_found: None,
            invalid: None,
        };
        let args: ListChannelsArgs = match parse_args(args) {
            Ok(a) => a,
            Err(f) => return Ok(op.output(f, json!({}))),
        };
        let team_id = args.team_id.clone().unwrap_or_default();
        op.not_found = Some(format!(
            "Team with ID '{team_id}' not found or you don't have access to it."
        ));
        Ok(match self.run(&args).await {
            Ok(body) => ToolOutput::json(&body),
            Err(failure) => op.output(failure, json!({ "teamId": team_id })),
        })
    }
}

// ── teams-send-channel-message ──────────────────────────────────────────────

pub struct SendChannelMessage {
    ctx: Arc<ToolContext>,
}

impl SendChannelMessage {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelArgs {
    team_id: Option<String>,
    channel_id: Option<String>,
    message: Option<String>,
    content_type: Option<String>,
    #[serde(default, deserialize_with = "whole_count")]
    count: Option<u32>,
}

impl ChannelArgs {
    fn ids(&self) -> Value {
        json!({
            "teamId": self.team_id.as_deref().unwrap_or_default(),
            "channelId": self.channel_id.as_deref().unwrap_or_default(),
        })
    }

    fn not_found(&self) -> String {
        format!(
            "Team or channel not found. Please verify the teamId '{}' and channelId '{}' are correct.",
            self.team_id.as_deref().unwrap_or_default(),
            self.channel_id.as_deref().unwrap_or_default()
        )
    }

    fn messages_path(&self) -> Result<String, Failure> {
        let team_id = require(&self.team_id, "teamId")?;
        let channel_id = require(&self.channel_id, "channelId")?;
        Ok(format!(
            "teams/{}/channels/{}/messages",
            segment(team_id),
            segment(channel_id)
        ))
    }
}

impl SendChannelMessage {
    async fn run(&self, args: &ChannelArgs) -> Result<Value, Failure> {
        let path = args.messages_path()?;
        let message = require(&args.message, "message")
            .map_err(|_| Failure::InvalidArgs("message is required and cannot be empty".into()))?;
        let content_type = args.content_type.as_deref().unwrap_or("text");
        if !matches!(content_type, "text" | "html") {
            return Err(Failure::InvalidArgs(
                "contentType must be 'text' or 'html'".into(),
            ));
        }

        let body = json!({
            "body": {
                "contentType": content_type,
                "content": message,
            }
        });
        let resp = self
            .ctx
            .call(Method::POST, &path, Some(&body), &GraphQuery::new())
            .await?;
        let sent = &resp.payload;
        let mut out = json!({
            "success": true,
            "messageId": sent["id"],
            "sentAt": sent["createdDateTime"],
            "webUrl": sent["webUrl"],
            "message": {
                "content": sent["body"]["content"],
                "contentType": sent["body"]["contentType"],
            },
        });
        if let (Some(obj), Value::Object(ids)) = (out.as_object_mut(), args.ids()) {
            obj.extend(ids);
        }
        Ok(out)
    }
}

#[async_trait]
impl Tool for SendChannelMessage {
    fn name(&self) -> &str {
        "teams-send-channel-message"
    }

    fn description(&self) -> &str {
        "Sends a message to a Microsoft Teams channel"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "teamId": {
                    "type": "string",
                    "description": "ID of the team containing the channel"
                },
                "channelId": {
                    "type": "string",
                    "description": "ID of the channel to send message to"
                },
                "message": {
                    "type": "string",
                    "description": "Message content to send"
                },
                "contentType": {
                    "type": "string",
                    "description": "Content type of the message (text or html)",
                    "enum": ["text", "html"],
                    "default": "text"
                }
            },
            "required": ["teamId", "channelId", "message"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolOutput> {
        let mut op = Operation {
            action: "send messages",
            scope: "ChannelMessage.Send",
            not_found: None,
            invalid: Some(
                "Invalid message content or format. Please check your message and content type.",
            ),
        };
        let args: ChannelArgs = match parse_args(args) {
            Ok(a) => a,
            Err(f) => return Ok(op.output(f, json!({}))),
        };
        op.not_found = Some(args.not_found());
        Ok(match self.run(&args).await {
            Ok(body) => ToolOutput::json(&body),
            Err(failure) => op.output(failure, args.ids()),
        })
    }
}

// ── teams-read-channel-messages ─────────────────────────────────────────────

pub struct ReadChannelMessages {
    ctx: Arc<ToolContext>,
}

impl ReadChannelMessages {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

fn author(from: &Value, with_kind: bool) -> Value {
    let user = &from["user"];
    let mut out = json!({
        "id": user["id"],
        "displayName": user["displayName"],
    });
    if with_kind && let Some(obj) = out.as_object_mut() {
        obj.insert("userIdentityType".into(), user["userIdentityType"].clone());
    }
    json!({ "user": out })
}

fn message_summary(msg: &Value) -> Value {
    let replies: Vec<Value> = msg
        .get("replies")
        .and_then(Value::as_array)
        .map(|rs| {
            rs.iter()
                .map(|r| {
                    json!({
                        "id": r["id"],
                        "createdDateTime": r["createdDateTime"],
                        "from": author(&r["from"], false),
                        "body": {
                            "contentType": r["body"]["contentType"],
                            "content": r["body"]["content"],
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    json!({
        "id": msg["id"],
        "createdDateTime": msg["createdDateTime"],
        "lastModifiedDateTime": msg["lastModifiedDateTime"],
        "messageType": msg["messageType"],
        "importance": msg["importance"],
        "webUrl": msg["webUrl"],
        "from": author(&msg["from"], true),
        "body": {
            "contentType": msg["body"]["contentType"],
            "content": msg["body"]["content"],
        },
        "mentions": msg.get("mentions").filter(|m| m.is_array()).cloned().unwrap_or(json!([])),
        "reactions": msg.get("reactions").filter(|r| r.is_array()).cloned().unwrap_or(json!([])),
        "replyCount": replies.len(),
        "replies": replies,
    })
}

impl ReadChannelMessages {
    async fn run(&self, args: &ChannelArgs) -> Result<Value, Failure> {
        let path = args.messages_path()?;
        let count = check_count(args.count.unwrap_or(DEFAULT_MESSAGE_COUNT))?;
        let query = GraphQuery::new()
            .param("$orderby", "createdDateTime desc")
            .param("$top", count)
            .param("$expand", "replies");
        let resp = self.ctx.call(Method::GET, &path, None, &query).await?;
        let messages: Vec<Value> = resp
            .items()
            .unwrap_or_default()
            .iter()
            .map(message_summary)
            .collect();
        let mut out = json!({
            "success": true,
            "count": messages.len(),
            "messages": messages,
        });
        if let (Some(obj), Value::Object(ids)) = (out.as_object_mut(), args.ids()) {
            obj.extend(ids);
        }
        Ok(out)
    }
}

#[async_trait]
impl Tool for ReadChannelMessages {
    fn name(&self) -> &str {
        "teams-read-channel-messages"
    }

    fn description(&self) -> &str {
        "Reads recent messages from a Microsoft Teams channel"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "teamId": {
                    "type": "string",
                    "description": "ID of the team containing the channel"
                },
                "channelId": {
                    "type": "string",
                    "description": "ID of the channel to read messages from"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of messages to retrieve (default: 20, max: 50)"
                }
            },
            "required": ["teamId", "channelId"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolOutput> {
        let mut op = Operation {
            action: "read messages",
            scope: "ChannelMessage.Read.All",
            not_found: None,
            invalid: None,
        };
        let args: ChannelArgs = match parse_args(args) {
            Ok(a) => a,
            Err(f) => return Ok(op.output(f, json!({}))),
        };
        op.not_found = Some(args.not_found());
        Ok(match self.run(&args).await {
            Ok(body) => ToolOutput::json(&body),
            Err(failure) => op.output(failure, args.ids()),
        })
    }
}

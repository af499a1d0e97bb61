//! Display 指令 payload 解码

use serde::Deserialize;
use serde_json::Value;

use crate::agents::RenderableItem;
use crate::core::DirectiveError;
use crate::directive::Directive;
use crate::play_sync::PlaySyncDuration;

/// 模板类指令名称（均为 visual / blocking）
pub const TEMPLATE_NAMES: &[&str] = &[
    "FullText1",
    "FullText2",
    "ImageText1",
    "ImageText2",
    "ImageText3",
    "ImageText4",
    "TextList1",
    "TextList2",
    "TextList3",
    "TextList4",
    "ImageList1",
    "ImageList2",
    "ImageList3",
    "Weather1",
    "Weather2",
    "Weather3",
    "Weather4",
    "Weather5",
    "FullImage",
    "CustomTemplate",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplatePayload {
    token: Option<String>,
    play_service_id: Option<String>,
    duration: Option<String>,
    play_stack_control: Option<PlayStackControl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayStackControl {
    play_service_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePayload {
    pub play_service_id: String,
}

impl ClosePayload {
    pub fn decode(directive: &Directive) -> Result<Self, DirectiveError> {
        Ok(serde_json::from_str(directive.payload())?)
    }
}

/// 由模板指令生成 RenderableItem；token 与 playServiceId 必填，未知 duration 回退到 SHORT
pub fn decode_template(directive: &Directive) -> Result<RenderableItem, DirectiveError> {
    let raw: Value = serde_json::from_str(directive.payload())?;
    let payload: TemplatePayload = serde_json::from_value(raw.clone())?;

    let (Some(token), Some(play_service_id)) = (payload.token, payload.play_service_id) else {
        return Err(DirectiveError::PayloadDecode(
            "Invalid token or playServiceId in payload".to_string(),
        ));
    };
    let duration = payload
        .duration
        .as_deref()
        .and_then(PlaySyncDuration::parse)
        .unwrap_or_default();

    Ok(RenderableItem {
        template_type: directive.type_name(),
        dialog_request_id: directive.dialog_request_id().to_string(),
        play_service_id,
        play_stack_service_id: payload.play_stack_control.and_then(|c| c.play_service_id),
        template_id: directive.message_id().to_string(),
        token,
        duration,
        payload: raw,
    })
}

use serde::{ Serialize, Deserialize };

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct CreateSessionRequest {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct RenameSessionRequest {
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

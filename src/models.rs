use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Base64-encoded image, with or without a `data:...;base64,` prefix.
    pub image: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiseaseAnalysisResult {
    pub disease_detected: bool,
    pub disease_name: Option<String>,
    pub disease_type: String,
    pub severity: String,
    pub confidence: f64,
    pub symptoms: Vec<String>,
    pub possible_causes: Vec<String>,
    pub treatment: Vec<String>,
    pub analysis_timestamp: String,
}

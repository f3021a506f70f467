//! HTTP client for a Face API v1.0 style recognition service.

use async_trait::async_trait;
use lookout_core::{
    Candidate, DetectOptions, FaceAttributes, IdentifyResult, Person, PersonGroup,
    RecognitionClient, RecognitionError, RemoteFace, TrainingStatus,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct FaceApiClient {
    http: reqwest::Client,
    endpoint: String,
    key: String,
}

impl FaceApiClient {
    pub fn new(endpoint: &str, key: &str) -> Result<Self, RecognitionError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RecognitionError> {
        let response = request
            .header(KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(|e| RecognitionError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RecognitionError::Service {
            status: status.as_u16(),
            message: service_message(&body),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RecognitionError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| RecognitionError::Decode(e.to_string()))
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn service_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }
    serde_json::from_str::<Envelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFace {
    face_id: String,
    #[serde(default)]
    face_attributes: Option<WireAttributes>,
}

#[derive(Deserialize)]
struct WireAttributes {
    age: Option<f32>,
    gender: Option<String>,
}

impl From<WireFace> for RemoteFace {
    fn from(face: WireFace) -> Self {
        let attributes = face
            .face_attributes
            .map(|a| FaceAttributes {
                age: a.age,
                gender: a.gender,
            })
            .unwrap_or_default();
        Self {
            face_id: face.face_id,
            attributes,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIdentify {
    face_id: String,
    candidates: Vec<WireCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    person_id: String,
    confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroup {
    person_group_id: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePerson {
    person_id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePersistedFace {
    persisted_face_id: String,
}

#[derive(Deserialize)]
struct WireTraining {
    status: String,
}

fn training_status(raw: &str) -> Result<TrainingStatus, RecognitionError> {
    match raw.to_ascii_lowercase().as_str() {
        "notstarted" | "running" => Ok(TrainingStatus::Running),
        "succeeded" => Ok(TrainingStatus::Succeeded),
        "failed" => Ok(TrainingStatus::Failed),
        other => Err(RecognitionError::Decode(format!("unknown training status {other:?}"))),
    }
}

fn detect_query(options: &DetectOptions) -> [(&'static str, String); 3] {
    let attributes: Vec<&str> = options.attributes.iter().map(|a| a.as_str()).collect();
    [
        ("returnFaceId", "true".to_string()),
        ("returnFaceLandmarks", options.landmarks.to_string()),
        ("returnFaceAttributes", attributes.join(",")),
    ]
}

#[async_trait]
impl RecognitionClient for FaceApiClient {
    async fn detect_faces(&self, image: &[u8], options: &DetectOptions) -> Result<Vec<RemoteFace>, RecognitionError> {
        let request = self
            .http
            .post(self.url("/detect"))
            .query(&detect_query(options))
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec());
        let faces: Vec<WireFace> = self.send_json(request).await?;
        Ok(faces.into_iter().map(RemoteFace::from).collect())
    }

    async fn identify_faces(&self, group_id: &str, face_ids: &[String]) -> Result<Vec<IdentifyResult>, RecognitionError> {
        let request = self.http.post(self.url("/identify")).json(&serde_json::json!({
            "personGroupId": group_id,
            "faceIds": face_ids,
        }));
        let results: Vec<WireIdentify> = self.send_json(request).await?;
        Ok(results
            .into_iter()
            .map(|r| IdentifyResult {
                face_id: r.face_id,
                candidates: r
                    .candidates
                    .into_iter()
                    .map(|c| Candidate {
                        person_id: c.person_id,
                        confidence: c.confidence,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn get_person(&self, group_id: &str, person_id: &str) -> Result<Person, RecognitionError> {
        let url = self.url(&format!("/persongroups/{group_id}/persons/{person_id}"));
        let person: WirePerson = self.send_json(self.http.get(url)).await?;
        Ok(Person {
            id: person.person_id,
            name: person.name.unwrap_or_default(),
        })
    }

    async fn list_groups(&self) -> Result<Vec<PersonGroup>, RecognitionError> {
        let groups: Vec<WireGroup> = self.send_json(self.http.get(self.url("/persongroups"))).await?;
        Ok(groups
            .into_iter()
            .map(|g| PersonGroup {
                id: g.person_group_id,
                name: g.name,
            })
            .collect())
    }

    async fn create_group(&self, group_id: &str, name: &str) -> Result<(), RecognitionError> {
        let request = self
            .http
            .put(self.url(&format!("/persongroups/{group_id}")))
            .json(&serde_json::json!({ "name": name }));
        self.send(request).await?;
        Ok(())
    }

    async fn create_person(&self, group_id: &str, name: &str) -> Result<Person, RecognitionError> {
        let request = self
            .http
            .post(self.url(&format!("/persongroups/{group_id}/persons")))
            .json(&serde_json::json!({ "name": name }));
        let person: WirePerson = self.send_json(request).await?;
        Ok(Person {
            id: person.person_id,
            name: name.to_string(),
        })
    }

    async fn add_person_face(
        &self,
        group_id: &str,
        person_id: &str,
        image: &[u8],
        label: &str,
    ) -> Result<String, RecognitionError> {
        let request = self
            .http
            .post(self.url(&format!(
                "/persongroups/{group_id}/persons/{person_id}/persistedFaces"
            )))
            .query(&[("userData", label)])
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec());
        let face: WirePersistedFace = self.send_json(request).await?;
        Ok(face.persisted_face_id)
    }

    async fn start_training(&self, group_id: &str) -> Result<(), RecognitionError> {
        let url = self.url(&format!("/persongroups/{group_id}/train"));
        self.send(self.http.post(url)).await?;
        Ok(())
    }

    async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, RecognitionError> {
        let url = self.url(&format!("/persongroups/{group_id}/training"));
        let training: WireTraining = self.send_json(self.http.get(url)).await?;
        training_status(&training.status)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::error::BookingError;
use crate::models::{
    AppointmentResponse, AvailabilityResult, CreateAppointmentRequest, ProviderClient,
    ServicesPage,
};
use crate::services::provider::BookingProvider;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP adapter for the Trinks booking API.
pub struct TrinksClient {
    client: Client,
    base_url: String,
    api_key: String,
    estabelecimento_id: String,
}

impl TrinksClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.trinks_base_url.clone(),
            api_key: config.trinks_api_key.clone(),
            estabelecimento_id: config.trinks_estabelecimento_id.clone(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("X-Api-Key", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.estabelecimento_id) {
            headers.insert("estabelecimentoId", value);
        }
        headers
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, BookingError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Trinks request to {}", url);

        let mut req = self.client.request(method, &url).headers(self.headers());
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Trinks API error ({}): {}", status, error_text);

            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(BookingError::ProviderUnavailable(format!(
                    "{}: {}",
                    status, error_text
                )));
            }
            return Err(BookingError::ProviderRejected {
                status: status.as_u16(),
                body: error_text,
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl BookingProvider for TrinksClient {
    async fn get_services_page(
        &self,
        updated_since: Option<DateTime<Utc>>,
        page: u32,
        limit: u32,
    ) -> Result<ServicesPage, BookingError> {
        let mut path = format!("/servicos?page={}&limit={}", page, limit);
        if let Some(since) = updated_since {
            path.push_str(&format!("&updated_since={}", since.to_rfc3339()));
        }
        self.request(Method::GET, &path, None).await
    }

    async fn validate_availability(
        &self,
        service_id: i64,
        professional_id: Option<i64>,
        start_iso: &str,
    ) -> Result<AvailabilityResult, BookingError> {
        let body = json!({
            "servicoId": service_id,
            "profissionalId": professional_id,
            "dataHoraInicio": start_iso,
        });

        #[derive(serde::Deserialize)]
        struct Wire {
            available: bool,
            reason: Option<String>,
            #[serde(default)]
            suggested_times: Vec<String>,
        }

        let wire: Wire = self
            .request(Method::POST, "/agendamentos/validar", Some(body))
            .await?;

        if wire.available {
            Ok(AvailabilityResult::confirmed_ok())
        } else {
            Ok(AvailabilityResult::unavailable(
                wire.reason.as_deref().unwrap_or("unavailable"),
                wire.suggested_times,
            ))
        }
    }

    async fn create_appointment(
        &self,
        request: &CreateAppointmentRequest,
    ) -> Result<AppointmentResponse, BookingError> {
        // The provider must never see a tentative booking.
        if !request.confirmed {
            return Err(BookingError::UnconfirmedAppointment);
        }

        let body = json!({
            "servicoId": request.service_id,
            "clienteId": request.client_id,
            "dataHoraInicio": request.start_iso,
            "duracaoEmMinutos": request.duration_min,
            "valor": request.price,
            "confirmado": true,
            "profissionalId": request.professional_id,
            "observacoes": request.notes,
        });

        self.request(Method::POST, "/agendamentos", Some(body)).await
    }

    async fn find_client_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ProviderClient>, BookingError> {
        let path = format!("/clientes?telefone={}", phone);
        let clients: Vec<ProviderClient> = self.request(Method::GET, &path, None).await?;
        Ok(clients.into_iter().next())
    }

    async fn append_service_to_appointment(
        &self,
        appointment_id: i64,
        addon_service_id: i64,
    ) -> Result<(), BookingError> {
        let path = format!("/agendamentos/{}/servicos", appointment_id);
        let body = json!({ "servicoId": addon_service_id });
        let _: Value = self.request(Method::POST, &path, Some(body)).await?;
        Ok(())
    }
}

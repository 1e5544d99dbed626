//! Typed façade over the [`Gateway`].
//!
//! Resource code talks to [`Client`]: authenticated by default, only GETs are
//! cached, bodies come back deserialized and failures come back as
//! [`ApiError`].

use crate::credentials::AuthenticatedUser;
use crate::{ApiError, ApiRequest, Error, Gateway, Response};
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

type Result<T> = std::result::Result<T, ApiError>;

/// Per-call overrides for [`Client`] requests.
///
/// # Examples
///
/// ```
/// use gridgate::client::RequestOptions;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .public()
///     .query("region", "north")
///     .timeout(Duration::from_secs(5));
/// assert!(!options.requires_auth);
/// ```
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Defaults to `true`.
    pub requires_auth: bool,
    pub skip_cache: bool,
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
    pub query_params: BTreeMap<String, String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            requires_auth: true,
            skip_cache: false,
            timeout: None,
            headers: HeaderMap::new(),
            query_params: BTreeMap::new(),
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the request without credentials.
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Typed client for backend resources.
///
/// # Examples
///
/// ```no_run
/// use gridgate::{Client, Gateway};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct NewAlert { site_id: u64, level: String }
///
/// #[derive(Deserialize)]
/// struct Alert { id: String, level: String }
///
/// # async fn example() -> Result<(), gridgate::ApiError> {
/// let client = Client::new(
///     Gateway::builder()
///         .base_url("https://api.example.com")?
///         .build()?,
/// );
///
/// client.login("operator@example.com", "hunter2").await?;
///
/// let alert = NewAlert { site_id: 7, level: "high".to_string() };
/// let created: gridgate::Response<Alert> = client.post("/alerts", &alert).await?;
/// println!("Raised alert {}", created.data.id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    gateway: Gateway,
}

impl Client {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// The underlying gateway, for cache, metrics and session access.
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Sends `request` with façade policies applied and deserializes the data.
    ///
    /// Non-GET requests always bypass the cache. When the request needs
    /// authentication and a valid token is stored, it is attached here; the
    /// gateway refreshes expired tokens itself.
    pub async fn send<Res>(&self, mut request: ApiRequest, options: RequestOptions) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        request.requires_auth = options.requires_auth;
        request.skip_cache = options.skip_cache || request.method != Method::GET;
        if options.timeout.is_some() {
            request.timeout = options.timeout;
        }
        request.headers.extend(options.headers);
        request.query_params.extend(options.query_params);

        if request.requires_auth {
            if let Some(credentials) = self.gateway.credentials().get() {
                let value = HeaderValue::try_from(format!("Bearer {}", credentials.access_token))
                    .map_err(|e| Error::ConfigurationError(format!("Invalid access token: {}", e)))?;
                request.headers.insert(AUTHORIZATION, value);
            }
        }

        let response = self.gateway.execute(request).await?;
        let raw_body = response.raw_body.clone();
        let status = response.status;

        response
            .try_map(|data| {
                serde_json::from_value::<Res>(data).map_err(|e| {
                    tracing::error!(
                        error = %e,
                        raw_response = %raw_body,
                        "Failed to deserialize response"
                    );
                    Error::DeserializationFailed {
                        raw_response: raw_body,
                        serde_error: e.to_string(),
                        status,
                    }
                })
            })
            .map_err(ApiError::from)
    }

    async fn send_body<Req, Res>(
        &self,
        method: Method,
        path: impl Into<String>,
        body: &Req,
        options: RequestOptions,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let request = ApiRequest::new(method, path).with_body(body)?;
        self.send(request, options).await
    }

    /// Makes an authenticated GET request.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gridgate::{Client, Gateway};
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Site { name: String }
    ///
    /// # async fn example(client: Client) -> Result<(), gridgate::ApiError> {
    /// let sites: gridgate::Response<Vec<Site>> = client.get("/sites").await?;
    /// for site in &sites.data {
    ///     println!("{}", site.name);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.get_with(path, RequestOptions::default()).await
    }

    pub async fn get_with<Res>(&self, path: impl Into<String>, options: RequestOptions) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.send(ApiRequest::get(path), options).await
    }

    /// Makes an authenticated POST request with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_body(Method::POST, path, body, RequestOptions::default())
            .await
    }

    pub async fn post_with<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
        options: RequestOptions,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_body(Method::POST, path, body, options).await
    }

    /// Makes an authenticated PUT request with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_body(Method::PUT, path, body, RequestOptions::default())
            .await
    }

    /// Makes an authenticated PATCH request with a JSON body.
    pub async fn patch<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        self.send_body(Method::PATCH, path, body, RequestOptions::default())
            .await
    }

    /// Makes an authenticated DELETE request.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.send(ApiRequest::delete(path), RequestOptions::default())
            .await
    }

    /// Signs in and returns the user profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthenticatedUser> {
        Ok(self.gateway.login(email, password).await?)
    }

    /// Signs out locally and on the server.
    pub async fn logout(&self) -> Result<()> {
        Ok(self.gateway.logout().await?)
    }

    pub fn current_user(&self) -> Option<AuthenticatedUser> {
        self.gateway.current_user()
    }
}

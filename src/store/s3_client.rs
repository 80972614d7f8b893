use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct S3ClientConfig<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
    pub endpoint_url: &'a str,
    pub force_path_style: bool,
}

/// `host:port` endpoints get a scheme from `use_tls`; full URLs are kept.
pub(crate) fn build_endpoint_url(endpoint: &str, use_tls: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.trim_end_matches('/').to_string();
    }
    let scheme = if use_tls { "https" } else { "http" };
    format!("{}://{}", scheme, endpoint.trim_end_matches('/'))
}

pub(crate) fn create_s3_client(config: &S3ClientConfig<'_>) -> Client {
    let credentials = Credentials::new(
        config.access_key_id,
        config.secret_access_key,
        None,
        None,
        "uploader-static",
    );

    // Failures end the job, so the SDK must not retry behind our back
    let builder = S3ConfigBuilder::new()
        .credentials_provider(credentials)
        .region(Region::new(config.region.to_string()))
        .endpoint_url(config.endpoint_url)
        .force_path_style(config.force_path_style)
        .retry_config(RetryConfig::disabled())
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build(),
        );

    Client::from_conf(builder.build())
}

//! A small management service over cleartext HTTP/2.
//!
//! Try it with `curl --http2-prior-knowledge http://127.0.0.1:8080/redfish/v1`.

use std::time::Duration;

use bmc_http::handler::{make_handler, AsyncResp};
use bmc_http::protocol::{Request, Verb};
use bmc_http::server::Server;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde_json::json;
use tracing::error;

fn handle(request: &Request, response: AsyncResp) {
    match (request.method(), request.path()) {
        (Some(Verb::Get), "/redfish/v1") => response.with(|res| {
            res.json_value = json!({
                "@odata.id": "/redfish/v1",
                "Id": "RootService",
                "Systems": { "@odata.id": "/redfish/v1/Systems" },
            });
        }),
        (Some(Verb::Get), "/redfish/v1/Systems/system") => {
            // pretend to ask another service, the response is sent when the task is done
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                response.with(|res| res.json_value = json!({ "Id": "system", "PowerState": "On" }));
            });
        }
        (Some(Verb::Get), "/redfish/v1/$metadata") => response.with(|res| {
            if res.open_file("/usr/share/www/redfish/v1/$metadata/index.xml") {
                res.add_header(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
            } else {
                res.set_status(StatusCode::NOT_FOUND);
            }
        }),
        _ => response.with(|res| res.set_status(StatusCode::NOT_FOUND)),
    }
}

#[tokio::main]
async fn main() {
    let server = match Server::builder().address("127.0.0.1:8080").handler(make_handler(handle)).build() {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "invalid server configuration");
            return;
        }
    };

    server.start().await;
}

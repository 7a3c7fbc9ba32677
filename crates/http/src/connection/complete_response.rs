use http::header::{CONTENT_TYPE, DATE};
use http::HeaderValue;
use tracing::{error, info};

use crate::date::DateService;
use crate::protocol::{Request, Response};

/// Fills in the fields every response carries before it is serialized.
///
/// Handles the entity tag (turning the response into a 304 when the client's
/// copy is current), renders the JSON value, stamps the date and sets the
/// content length.
pub(crate) fn complete_response_fields(request: &Request, res: &mut Response) {
    info!(path = request.path(), status = res.status_int(), "response");

    res.set_hash_and_handle_not_modified();

    if !res.json_value.is_null() {
        match serde_json::to_vec_pretty(&res.json_value) {
            Ok(json) => {
                match HeaderValue::from_str(mime::APPLICATION_JSON.as_ref()) {
                    Ok(content_type) => res.add_header(CONTENT_TYPE, content_type),
                    Err(e) => error!(cause = %e, "invalid json content type"),
                }
                res.write(&json);
            }
            Err(e) => error!(cause = %e, "failed to render json response"),
        }
    }

    res.add_header(DATE, DateService::get_global_instance().http_date());
    res.prepare_payload();
}

#[cfg(test)]
mod tests {
    use http::header::{CONTENT_LENGTH, ETAG};
    use http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::protocol::ResponseBody;

    fn body_of(res: &Response) -> Vec<u8> {
        match res.body() {
            ResponseBody::Buffered(buf) => buf.to_vec(),
            ResponseBody::File(_) => panic!("expected a buffered body"),
        }
    }

    #[test]
    fn json_is_rendered_pretty_with_length_and_date() {
        let request = Request::new();
        let mut res = Response::new();
        res.json_value = json!({"Id": "1"});

        complete_response_fields(&request, &mut res);

        let expected = b"{\n  \"Id\": \"1\"\n}";
        assert_eq!(body_of(&res), expected);
        assert_eq!(res.header_value(CONTENT_TYPE), Some("application/json"));
        assert_eq!(res.header_value(CONTENT_LENGTH), Some(expected.len().to_string().as_str()));
        assert!(res.header_value(ETAG).is_some());
        assert!(res.header_value(DATE).is_some());
    }

    #[test]
    fn matching_etag_sends_an_empty_304() {
        let request = Request::new();
        let mut first = Response::new();
        first.json_value = json!({"Status": {"State": "Enabled"}});
        complete_response_fields(&request, &mut first);
        let etag = first.header_value(ETAG).unwrap().to_string();

        let mut second = Response::new();
        second.json_value = json!({"Status": {"State": "Enabled"}});
        second.set_expected_hash(etag.as_str());
        complete_response_fields(&request, &mut second);

        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert!(body_of(&second).is_empty());
        assert_eq!(second.header_value(ETAG), Some(etag.as_str()));
        assert_eq!(second.header_value(CONTENT_TYPE), None);
        assert_eq!(second.header_value(CONTENT_LENGTH), None);
    }

    #[test]
    fn plain_body_is_left_alone() {
        let request = Request::new();
        let mut res = Response::new();
        res.set_status(StatusCode::NOT_FOUND);
        res.write(b"not here");

        complete_response_fields(&request, &mut res);

        assert_eq!(body_of(&res), b"not here");
        assert_eq!(res.header_value(CONTENT_TYPE), None);
        assert_eq!(res.header_value(ETAG), None);
        assert_eq!(res.header_value(CONTENT_LENGTH), Some("8"));
    }
}

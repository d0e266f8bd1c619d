use engine_client::chat_url;
use engine_client::url::chat_url_for;
use engine_contract::EngineEndpoint;

#[test]
fn chat_url_appends_route_to_bare_base() {
    assert_eq!(
        chat_url("http://127.0.0.1:5000"),
        "http://127.0.0.1:5000/api/chat"
    );
    assert_eq!(
        chat_url("http://127.0.0.1:5000/"),
        "http://127.0.0.1:5000/api/chat"
    );
}

#[test]
fn chat_url_completes_api_prefix_and_keeps_full_route() {
    assert_eq!(chat_url("http://localhost/api"), "http://localhost/api/chat");
    assert_eq!(
        chat_url(" http://localhost/api/chat/ "),
        "http://localhost/api/chat"
    );
}

#[test]
fn endpoint_url_uses_loopback_port() {
    assert_eq!(
        chat_url_for(&EngineEndpoint::loopback(41000)),
        "http://127.0.0.1:41000/api/chat"
    );
}

//! HTTP response builder and wire serialization.

use crate::types::{Headers, StatusCode};
use evio_core::MsgBuffer;

pub struct HttpResponse {
    status_code: StatusCode,
    status_message: String,
    close_connection: bool,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpResponse {
    /// `close` selects whether the connection shuts down after this
    /// response is written.
    pub fn new(close: bool) -> HttpResponse {
        HttpResponse {
            status_code: StatusCode::Ok,
            status_message: String::new(),
            close_connection: close,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn set_status_code(&mut self, code: StatusCode) {
        self.status_code = code;
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn set_status_message(&mut self, message: &str) {
        self.status_message = message.to_string();
    }

    /// Set status code and its default message in one go.
    pub fn set_status(&mut self, code: StatusCode) {
        self.status_code = code;
        self.status_message = code.default_message().to_string();
    }

    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    pub fn set_close_connection(&mut self, on: bool) {
        self.close_connection = on;
    }

    /// Add a header. Empty names and embedded CR/LF are silently rejected.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set(name, value);
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Serialize status line, connection policy (`Content-Length` +
    /// keep-alive, or `Connection: close`), headers, blank line and body.
    pub fn append_to(&self, output: &mut MsgBuffer) {
        output.write(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status_code.code(),
                self.status_message
            )
            .as_bytes(),
        );

        if self.close_connection {
            output.write(b"Connection: close\r\n");
        } else {
            output.write(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
            output.write(b"Connection: Keep-Alive\r\n");
        }

        for (name, value) in self.headers.iter() {
            output.write(format!("{}: {}\r\n", name, value).as_bytes());
        }

        output.write(b"\r\n");
        output.write(&self.body);
    }
}

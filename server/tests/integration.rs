// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios driven over a real loopback TCP connection
//! against the embedded [`rask::serve::Server`] helper: headers echo,
//! an unknown-length chunked body, keep-alive persistence across two
//! requests, on-the-fly gzip, and single/multiple `Set-Cookie`.

use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rask::serve::Server;
use rask::stream::ReadOptimization;
use rask::transaction::Transaction;

fn handler(txn: &mut Transaction) {
    match txn.request.target.as_str() {
        "/echo-headers" => {
            let mut body = String::new();
            for (name, value) in &txn.request.headers {
                body.push_str(name);
                body.push_str(": ");
                body.push_str(&String::from_utf8_lossy(value));
                body.push('\n');
            }
            let mut writer = txn.write_body_start(body.len() as u64, "text/plain").unwrap();
            writer.write(body.as_bytes()).unwrap();
            writer.close().unwrap();
        }
        "/chunked" => {
            let mut writer = txn.write_body_start_chunked("text/plain").unwrap();
            writer.write(b"hello ").unwrap();
            writer.write(b"chunked ").unwrap();
            writer.write(b"world").unwrap();
            writer.close().unwrap();
        }
        "/keepalive" => {
            let mut writer = txn.write_body_start(2, "text/plain").unwrap();
            writer.write(b"ok").unwrap();
            writer.close().unwrap();
        }
        "/echo-body" => {
            let mut body = Vec::new();
            let mut reader = txn.body_reader(ReadOptimization::Bandwidth);
            reader.read(&mut body, ReadOptimization::Bandwidth).unwrap();
            let mut writer = txn.write_body_start(body.len() as u64, "text/plain").unwrap();
            writer.write(&body).unwrap();
            writer.close().unwrap();
        }
        "/echo-simple" => {
            let mut writer = txn.write_body_start(2, "text/plain").unwrap();
            writer.write(b"ok").unwrap();
            writer.close().unwrap();
        }
        "/gzip" => {
            let payload = vec![b'x'; 4096];
            let mut writer = txn.write_body_start_compressed("text/plain").unwrap();
            writer.write(&payload).unwrap();
            writer.close().unwrap();
        }
        "/cookie-one" => {
            txn.response.push_header("Set-Cookie", b"session=abc".to_vec());
            txn.write_body_no_content().unwrap();
        }
        "/cookie-many" => {
            txn.response.push_header("Set-Cookie", b"a=1".to_vec());
            txn.response.push_header("Set-Cookie", b"b=2".to_vec());
            txn.write_body_no_content().unwrap();
        }
        _ => {
            txn.reset_response(parser::Status::NotFound);
            txn.write_body_no_content().unwrap();
        }
    }
}

struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Reads one HTTP/1.1 response head plus its body off `reader`, honoring
/// either `Content-Length` or `Transfer-Encoding: chunked` framing.
fn read_response(reader: &mut BufReader<&TcpStream>) -> Response {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let head = String::from_utf8(head).unwrap();
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let status_line = lines.next().unwrap();
    let status: u16 = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').unwrap();
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let is_chunked = headers
        .iter()
        .any(|(n, v)| n.eq_ignore_ascii_case("transfer-encoding") && v.eq_ignore_ascii_case("chunked"));

    let body = if is_chunked {
        read_chunked_body(reader)
    } else if let Some(len) = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse::<usize>().unwrap())
    {
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).unwrap();
        body
    } else {
        Vec::new()
    };

    Response { status, headers, body }
}

fn read_line(reader: &mut BufReader<&TcpStream>) -> Vec<u8> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).unwrap();
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    line
}

fn read_chunked_body(reader: &mut BufReader<&TcpStream>) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(reader);
        let size = usize::from_str_radix(std::str::from_utf8(&size_line).unwrap().trim(), 16).unwrap();
        if size == 0 {
            // Trailers, terminated by a blank line.
            loop {
                if read_line(reader).is_empty() {
                    break;
                }
            }
            break;
        }
        let mut chunk = vec![0u8; size];
        reader.read_exact(&mut chunk).unwrap();
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).unwrap();
    }
    body
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

#[test]
fn echoes_request_headers_back_in_the_body() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream
        .write_all(b"GET /echo-headers HTTP/1.1\r\nHost: example.org\r\nX-Test: hi\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(200, response.status);
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.contains("Host: example.org"));
    assert!(body.contains("X-Test: hi"));

    server.shutdown();
}

#[test]
fn chunked_body_of_unknown_length_round_trips() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream
        .write_all(b"GET /chunked HTTP/1.1\r\nHost: example.org\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(200, response.status);
    assert_eq!(Some("chunked"), response.header("transfer-encoding"));
    assert_eq!(b"hello chunked world" as &[u8], response.body.as_slice());

    server.shutdown();
}

#[test]
fn keep_alive_serves_two_requests_on_one_connection() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let stream = connect(&server);
    let mut reader = BufReader::new(&stream);

    for _ in 0..2 {
        (&stream)
            .write_all(b"GET /keepalive HTTP/1.1\r\nHost: example.org\r\n\r\n")
            .unwrap();
        let response = read_response(&mut reader);
        assert_eq!(200, response.status);
        assert_eq!(b"ok" as &[u8], response.body.as_slice());
    }

    server.shutdown();
}

#[test]
fn gzip_body_is_compressed_on_the_fly() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream
        .write_all(b"GET /gzip HTTP/1.1\r\nHost: example.org\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(200, response.status);
    assert_eq!(Some("gzip"), response.header("content-encoding"));

    let mut decoder = flate2::read::GzDecoder::new(response.body.as_slice());
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();
    assert_eq!(vec![b'x'; 4096], decompressed);

    server.shutdown();
}

#[test]
fn a_single_set_cookie_header_is_sent() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream
        .write_all(b"GET /cookie-one HTTP/1.1\r\nHost: example.org\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(vec!["session=abc"], response.header_all("set-cookie"));

    server.shutdown();
}

#[test]
fn multiple_set_cookie_headers_are_each_sent_separately() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream
        .write_all(b"GET /cookie-many HTTP/1.1\r\nHost: example.org\r\nConnection: close\r\n\r\n")
        .unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(vec!["a=1", "b=2"], response.header_all("set-cookie"));

    server.shutdown();
}

#[test]
fn a_body_arriving_in_the_same_packet_as_the_head_is_not_reread_as_header_bytes() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream
        .write_all(
            b"POST /echo-body HTTP/1.1\r\nHost: example.org\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(200, response.status);
    assert_eq!(b"hello" as &[u8], response.body.as_slice());

    server.shutdown();
}

#[test]
fn a_malformed_request_line_gets_a_400_response() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream.write_all(b"G;T / HTTP/1.1\r\n\r\n").unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(400, response.status);
    assert_eq!(Some("close"), response.header("connection"));

    server.shutdown();
}

#[test]
fn a_bare_path_request_line_is_served_as_an_implied_get() {
    let mut server = Server::start(2, Arc::new(handler)).unwrap();
    let mut stream = connect(&server);
    stream.write_all(b"/echo-simple\r\n").unwrap();

    let mut reader = BufReader::new(&stream);
    let response = read_response(&mut reader);

    assert_eq!(200, response.status);
    assert_eq!(b"ok" as &[u8], response.body.as_slice());

    server.shutdown();
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Read-only IPP queries answered from the spooler's own tables.
//
// A protocol gateway forwards the binary body of an IPP request over the
// control socket.  The spooler answers the queries it can serve without the
// gateway: printer and class attributes, the job list, and the CUPS
// printer and class listings.  Job submission stays with the gateway.
//
// # Supported operations
//
//   - Get-Jobs                (0x000A)  RFC 8011 SS4.2.6
//   - Get-Printer-Attributes  (0x000B)  RFC 8011 SS4.2.5
//   - CUPS-Get-Printers       (0x4002)
//   - CUPS-Get-Classes        (0x4005)

use tracing::{debug, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::{DestId, PrinterStatus};

use crate::queue::QueueFileInfo;
use crate::spooler::Spooler;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// IPP version 1.1 major byte.
const IPP_VERSION_MAJOR: u8 = 0x01;

/// IPP version 1.1 minor byte.
const IPP_VERSION_MINOR: u8 = 0x01;

/// URI path segment for printers.
const DIR_PRINTERS: &str = "printers";

/// URI path segment for groups, named as CUPS names its classes.
const DIR_CLASSES: &str = "classes";

/// Data file whose size is reported as `job-k-octets`.
const INPUT_SUFFIX: &str = "infile";

// ---------------------------------------------------------------------------
// IPP delimiter tags (RFC 8010 SS3.5.1)
// ---------------------------------------------------------------------------

pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;
pub const TAG_PRINTER_ATTRIBUTES: u8 = 0x04;

// ---------------------------------------------------------------------------
// IPP value tags (RFC 8010 SS3.5.2)
// ---------------------------------------------------------------------------

pub const VALUE_TAG_INTEGER: u8 = 0x21;
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;
pub const VALUE_TAG_ENUM: u8 = 0x23;
pub const VALUE_TAG_TEXT: u8 = 0x41;
pub const VALUE_TAG_NAME: u8 = 0x42;
pub const VALUE_TAG_URI: u8 = 0x45;
pub const VALUE_TAG_CHARSET: u8 = 0x47;
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;
pub const VALUE_TAG_MIME_TYPE: u8 = 0x49;

// ---------------------------------------------------------------------------
// Operations and status codes
// ---------------------------------------------------------------------------

pub const OP_GET_JOBS: u16 = 0x000A;
pub const OP_GET_PRINTER_ATTRIBUTES: u16 = 0x000B;
pub const OP_CUPS_GET_PRINTERS: u16 = 0x4002;
pub const OP_CUPS_GET_CLASSES: u16 = 0x4005;

pub const STATUS_OK: u16 = 0x0000;
pub const STATUS_CLIENT_ERROR_NOT_FOUND: u16 = 0x0406;
pub const STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;

// printer-state values (RFC 8011 SS4.4.11)
const PRINTER_STATE_IDLE: i32 = 3;
const PRINTER_STATE_PROCESSING: i32 = 4;
const PRINTER_STATE_STOPPED: i32 = 5;

/// Formats a driver is expected to take.
const DOCUMENT_FORMATS: [&str; 3] = ["text/plain", "application/postscript", "application/octet-stream"];

// ---------------------------------------------------------------------------
// Parsed IPP request
// ---------------------------------------------------------------------------

/// A single parsed IPP attribute.
#[derive(Debug, Clone)]
pub struct IppAttribute {
    pub value_tag: u8,
    /// Empty for additional values in a 1setOf.
    pub name: String,
    pub value: Vec<u8>,
}

/// A group of attributes delimited by a group tag.
#[derive(Debug, Clone)]
pub struct IppAttributeGroup {
    pub delimiter: u8,
    pub attributes: Vec<IppAttribute>,
}

impl IppAttributeGroup {
    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|a| String::from_utf8(a.value.clone()).ok())
    }

    pub fn get_integer(&self, name: &str) -> Option<i32> {
        self.get(name)
            .and_then(|a| <[u8; 4]>::try_from(a.value.as_slice()).ok())
            .map(i32::from_be_bytes)
    }

    /// Every value of a 1setOf attribute, as strings.
    pub fn get_strings(&self, name: &str) -> Vec<String> {
        let Some(start) = self.attributes.iter().position(|a| a.name == name) else {
            return Vec::new();
        };
        std::iter::once(&self.attributes[start])
            .chain(self.attributes[start + 1..].iter().take_while(|a| a.name.is_empty()))
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
            .collect()
    }
}

/// A parsed IPP message.  For a response the operation id holds the
/// status code.
#[derive(Debug)]
pub struct IppMessage {
    pub version_major: u8,
    pub version_minor: u8,
    pub operation_id: u16,
    pub request_id: u32,
    pub attribute_groups: Vec<IppAttributeGroup>,
    /// Everything after the end-of-attributes tag.
    pub document_data: Vec<u8>,
}

impl IppMessage {
    pub fn operation_attributes(&self) -> Option<&IppAttributeGroup> {
        self.group(TAG_OPERATION_ATTRIBUTES)
    }

    pub fn group(&self, delimiter: u8) -> Option<&IppAttributeGroup> {
        self.attribute_groups
            .iter()
            .find(|g| g.delimiter == delimiter)
    }

    pub fn groups(&self, delimiter: u8) -> impl Iterator<Item = &IppAttributeGroup> {
        self.attribute_groups
            .iter()
            .filter(move |g| g.delimiter == delimiter)
    }
}

// ---------------------------------------------------------------------------
// IPP binary parser
// ---------------------------------------------------------------------------

/// Parse a raw IPP message (RFC 8010 SS3.1).
///
/// ```text
/// version-number:  2 bytes (major, minor)
/// operation-id:    2 bytes (big-endian u16)
/// request-id:      4 bytes (big-endian u32)
/// attribute-groups: variable
///   delimiter-tag: 1 byte
///   attributes:    variable
///     value-tag:    1 byte
///     name-length:  2 bytes (big-endian u16)
///     name:         name-length bytes
///     value-length: 2 bytes (big-endian u16)
///     value:        value-length bytes
/// end-of-attributes-tag: 1 byte (0x03)
/// document-data: remainder
/// ```
pub fn parse_ipp_message(data: &[u8]) -> Result<IppMessage> {
    if data.len() < 8 {
        return Err(SpoolError::Ipp(format!(
            "message too short: {} bytes (minimum 8)",
            data.len()
        )));
    }

    let version_major = data[0];
    let version_minor = data[1];
    let operation_id = u16::from_be_bytes([data[2], data[3]]);
    let request_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    let mut pos = 8;
    let mut attribute_groups: Vec<IppAttributeGroup> = Vec::new();
    let mut current_group: Option<IppAttributeGroup> = None;

    while pos < data.len() {
        let tag = data[pos];

        // Delimiter tags are in the range 0x00..=0x0F.
        if tag <= 0x0F {
            if let Some(group) = current_group.take() {
                attribute_groups.push(group);
            }
            pos += 1;
            if tag == TAG_END_OF_ATTRIBUTES {
                break;
            }
            current_group = Some(IppAttributeGroup {
                delimiter: tag,
                attributes: Vec::new(),
            });
            continue;
        }

        pos += 1;
        let name_length = read_length(data, &mut pos, "name-length")?;
        let name = String::from_utf8_lossy(take(data, &mut pos, name_length, "name")?).into_owned();
        let value_length = read_length(data, &mut pos, "value-length")?;
        let value = take(data, &mut pos, value_length, "value")?.to_vec();

        let attr = IppAttribute {
            value_tag: tag,
            name,
            value,
        };
        match current_group.as_mut() {
            Some(group) => group.attributes.push(attr),
            None => warn!("IPP attribute outside of any group discarded"),
        }
    }

    if let Some(group) = current_group.take() {
        attribute_groups.push(group);
    }

    Ok(IppMessage {
        version_major,
        version_minor,
        operation_id,
        request_id,
        attribute_groups,
        document_data: data.get(pos..).map(<[u8]>::to_vec).unwrap_or_default(),
    })
}

fn read_length(data: &[u8], pos: &mut usize, field: &str) -> Result<usize> {
    let bytes = take(data, pos, 2, field)?;
    Ok(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize, field: &str) -> Result<&'a [u8]> {
    let end = *pos + len;
    let slice = data
        .get(*pos..end)
        .ok_or_else(|| SpoolError::Ipp(format!("truncated {field}")))?;
    *pos = end;
    Ok(slice)
}

// ---------------------------------------------------------------------------
// IPP binary response builder
// ---------------------------------------------------------------------------

/// Builder for IPP response messages (RFC 8010 SS3.4).
pub struct IppResponseBuilder {
    buf: Vec<u8>,
}

impl IppResponseBuilder {
    /// A response with the given status code, echoing `request_id`.  The
    /// operation group with charset and language is opened at once.
    pub fn new(status_code: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(IPP_VERSION_MAJOR);
        buf.push(IPP_VERSION_MINOR);
        buf.extend_from_slice(&status_code.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        let mut builder = Self { buf };
        builder
            .begin_group(TAG_OPERATION_ATTRIBUTES)
            .write_attr(VALUE_TAG_CHARSET, "attributes-charset", b"utf-8")
            .write_attr(VALUE_TAG_NATURAL_LANGUAGE, "attributes-natural-language", b"en");
        builder
    }

    pub fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_TEXT, name, value.as_bytes())
    }

    pub fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NAME, name, value.as_bytes())
    }

    /// A 1setOf values of one tag; additional values have an empty name
    /// (RFC 8010 SS3.1.4).
    pub fn set_of(&mut self, value_tag: u8, name: &str, values: &[&str]) -> &mut Self {
        for (i, value) in values.iter().enumerate() {
            let name = if i == 0 { name } else { "" };
            self.write_attr(value_tag, name, value.as_bytes());
        }
        self
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_URI, name, value.as_bytes())
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_INTEGER, name, &value.to_be_bytes())
    }

    pub fn enum_attr(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_ENUM, name, &value.to_be_bytes())
    }

    pub fn boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.write_attr(VALUE_TAG_BOOLEAN, name, &[u8::from(value)])
    }

    /// Write a raw attribute.  Names and values longer than a length field
    /// can express are cut short.
    pub fn write_attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        let name = &name.as_bytes()[..name.len().min(usize::from(u16::MAX))];
        let value = &value[..value.len().min(usize::from(u16::MAX))];
        self.buf.push(value_tag);
        self.buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name);
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    /// Write the end-of-attributes tag and return the bytes.
    pub fn build(mut self) -> Vec<u8> {
        self.buf.push(TAG_END_OF_ATTRIBUTES);
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Request context and dispatch
// ---------------------------------------------------------------------------

/// Request context passed along by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IppEnvironment {
    pub root: Option<String>,
    pub path_info: Option<String>,
    pub remote_user: Option<String>,
    pub remote_addr: Option<String>,
}

/// An encoded IPP response and its status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IppResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// The destination a `printer-uri` names, by its path.
fn dest_from_uri(uri: &str) -> Option<(bool, &str)> {
    let tail = |dir: &str| {
        let marker = format!("/{dir}/");
        uri.find(&marker).map(|at| &uri[at + marker.len()..])
    };
    tail(DIR_CLASSES)
        .map(|name| (true, name))
        .or_else(|| tail(DIR_PRINTERS).map(|name| (false, name)))
}

fn printer_state(status: PrinterStatus) -> i32 {
    match status {
        PrinterStatus::Idle
        | PrinterStatus::Engaged
        | PrinterStatus::Starved
        | PrinterStatus::Fault => PRINTER_STATE_IDLE,
        PrinterStatus::Printing
        | PrinterStatus::Canceling
        | PrinterStatus::Seizing
        | PrinterStatus::Stopping
        | PrinterStatus::Halting => PRINTER_STATE_PROCESSING,
        PrinterStatus::Stopt | PrinterStatus::Deleted => PRINTER_STATE_STOPPED,
    }
}

impl Spooler {
    /// The URI path of a destination.
    fn dest_uri(&self, dest: DestId) -> String {
        let dir = if dest.is_group() { DIR_CLASSES } else { DIR_PRINTERS };
        format!("/{dir}/{}", self.registry.dest_name(dest))
    }

    /// Resolve a `printer-uri`.  The path segment decides between printer
    /// and group, so a shared name is unambiguous here.
    fn dest_for_uri(&self, uri: &str) -> Option<DestId> {
        match dest_from_uri(uri)? {
            (true, name) => self.registry.group_by_name(name).map(DestId::Group),
            (false, name) => self.registry.printer_by_name(name).map(DestId::Printer),
        }
    }

    /// A group is processing while any member is, and stopped when all are.
    fn dest_state(&self, dest: DestId) -> i32 {
        let states: Vec<i32> = self
            .registry
            .candidates(dest)
            .into_iter()
            .map(|prn| printer_state(self.registry.printer(prn).status))
            .collect();
        if states.contains(&PRINTER_STATE_PROCESSING) {
            PRINTER_STATE_PROCESSING
        } else if !states.is_empty() && states.iter().all(|s| *s == PRINTER_STATE_STOPPED) {
            PRINTER_STATE_STOPPED
        } else {
            PRINTER_STATE_IDLE
        }
    }

    /// Answer one IPP request.  A body that does not parse is an error; an
    /// operation the spooler does not serve gets an IPP error status.
    pub fn handle_ipp(&self, data: &[u8], env: &IppEnvironment) -> Result<IppResponse> {
        let request = parse_ipp_message(data)?;
        debug!(
            operation = format_args!("0x{:04x}", request.operation_id),
            user = env.remote_user.as_deref().unwrap_or("-"),
            addr = env.remote_addr.as_deref().unwrap_or("-"),
            "IPP request"
        );
        let response = match request.operation_id {
            OP_GET_PRINTER_ATTRIBUTES => self.ipp_get_printer_attributes(&request),
            OP_GET_JOBS => self.ipp_get_jobs(&request),
            OP_CUPS_GET_PRINTERS => self.ipp_cups_get_printers(&request),
            OP_CUPS_GET_CLASSES => self.ipp_cups_get_classes(&request),
            other => {
                warn!(operation = format_args!("0x{other:04x}"), "unsupported IPP operation");
                error_response(
                    STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED,
                    request.request_id,
                    "server-error-operation-not-supported",
                )
            }
        };
        Ok(response)
    }

    fn ipp_get_printer_attributes(&self, request: &IppMessage) -> IppResponse {
        let dest = request
            .operation_attributes()
            .and_then(|g| g.get_string("printer-uri"))
            .and_then(|uri| self.dest_for_uri(&uri));
        let Some(dest) = dest else {
            return error_response(STATUS_CLIENT_ERROR_NOT_FOUND, request.request_id, "client-error-not-found");
        };

        let mut resp = IppResponseBuilder::new(STATUS_OK, request.request_id);
        resp.text("status-message", "successful-ok");
        resp.begin_group(TAG_PRINTER_ATTRIBUTES)
            .uri("printer-uri", &self.dest_uri(dest))
            .enum_attr("printer-state", self.dest_state(dest))
            .boolean("printer-is-accepting-jobs", self.registry.is_accepting(dest))
            .set_of(VALUE_TAG_MIME_TYPE, "document-format-supported", &DOCUMENT_FORMATS);
        ok(resp)
    }

    /// Every local job, or those of the destination `printer-uri` names.
    fn ipp_get_jobs(&self, request: &IppMessage) -> IppResponse {
        let filter = match request
            .operation_attributes()
            .and_then(|g| g.get_string("printer-uri"))
        {
            Some(uri) if dest_from_uri(&uri).is_some() => match self.dest_for_uri(&uri) {
                Some(dest) => Some(dest),
                None => {
                    return error_response(STATUS_CLIENT_ERROR_NOT_FOUND, request.request_id, "client-error-not-found");
                }
            },
            _ => None,
        };

        let mut resp = IppResponseBuilder::new(STATUS_OK, request.request_id);
        resp.text("status-message", "successful-ok");
        let mut count = 0;
        for entry in self.queue.entries() {
            let key = entry.key;
            if !self.nodes.is_local(key.destnode) || filter.is_some_and(|d| d != key.dest) {
                continue;
            }
            let name = self.job_name(&key);
            let info = match QueueFileInfo::read(&name.queue_file(&self.config.paths.queue_dir)) {
                Ok(info) => info,
                Err(e) => {
                    warn!(job = %name, error = %e, "queue file unreadable, job not listed");
                    continue;
                }
            };
            let bytes = std::fs::metadata(name.data_file(&self.config.paths.data_dir, INPUT_SUFFIX))
                .map_or(0, |m| m.len());
            let kilobytes = i32::try_from((bytes + 512) / 1024).unwrap_or(i32::MAX);

            resp.begin_group(TAG_JOB_ATTRIBUTES)
                .integer("job-id", key.id)
                .uri("job-printer-uri", &self.dest_uri(key.dest))
                .uri("job-uri", &format!("/jobs/{}", key.id));
            if let Some(title) = &info.title {
                resp.name_attr("job-name", title);
            }
            if let Some(user) = &info.for_user {
                resp.name_attr("job-originating-user-name", user);
            }
            resp.integer("job-k-octets", kilobytes);
            count += 1;
        }
        debug!(count, "Get-Jobs answered");
        ok(resp)
    }

    fn ipp_cups_get_printers(&self, request: &IppMessage) -> IppResponse {
        let mut resp = IppResponseBuilder::new(STATUS_OK, request.request_id);
        resp.text("status-message", "successful-ok");
        for prn in self.registry.printer_ids() {
            let printer = self.registry.printer(prn);
            if printer.deleted {
                continue;
            }
            resp.begin_group(TAG_PRINTER_ATTRIBUTES)
                .name_attr("printer-name", &printer.name)
                .uri("printer-uri", &self.dest_uri(DestId::Printer(prn)))
                .boolean("printer-is-accepting-jobs", printer.accepting);
        }
        ok(resp)
    }

    fn ipp_cups_get_classes(&self, request: &IppMessage) -> IppResponse {
        let mut resp = IppResponseBuilder::new(STATUS_OK, request.request_id);
        resp.text("status-message", "successful-ok");
        for id in self.registry.group_ids() {
            let group = self.registry.group(id);
            if group.deleted {
                continue;
            }
            let members: Vec<&str> = group
                .members
                .iter()
                .map(|prn| self.registry.printer(*prn).name.as_str())
                .collect();
            resp.begin_group(TAG_PRINTER_ATTRIBUTES)
                .name_attr("printer-name", &group.name)
                .uri("printer-uri", &self.dest_uri(DestId::Group(id)))
                .boolean("printer-is-accepting-jobs", group.accepting)
                .set_of(VALUE_TAG_NAME, "member-names", &members);
        }
        ok(resp)
    }
}

fn ok(resp: IppResponseBuilder) -> IppResponse {
    IppResponse {
        status: STATUS_OK,
        body: resp.build(),
    }
}

fn error_response(status: u16, request_id: u32, message: &str) -> IppResponse {
    let mut resp = IppResponseBuilder::new(status, request_id);
    resp.text("status-message", message);
    IppResponse {
        status,
        body: resp.build(),
    }
}

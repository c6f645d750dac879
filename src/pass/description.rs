//! Description Files
//!
//! Line-oriented parsers for the two metadata formats that make the
//! pipeline data-driven:
//!
//! - **Render-pass description** — which shader stages exist, where they
//!   run, and which extra framebuffer targets and buffers the pass carries:
//!
//!   ```text
//!   <Stages>
//!   shaders/sprite[1]=0
//!   shaders/glow[3]=0
//!   </Stages>
//!   <FBOs>
//!   glowTarget=3
//!   </FBOs>
//!   <Buffers>
//!   particles[0]
//!   </Buffers>
//!   ```
//!
//! - **Shader-stage description** — sources plus declared inputs, uniforms
//!   and buffers:
//!
//!   ```text
//!   <Vertex>
//!   sprite.vert.wgsl
//!   <Fragment>
//!   sprite.frag.wgsl
//!   <In>
//!   pos[4]=0
//!   </In>
//!   <Uniform>
//!   objectMatrix[64]
//!   tex[unique]
//!   </Uniform>
//!   ```
//!
//! Section tags are case-insensitive; entries are `name[value]` or
//! `name=value` with bracket/equals delimiters. Malformed entries are
//! parse errors, not warnings: a render pass built from a bad file should
//! never come up half-configured.

use super::shader_stage::{BufferKind, InputAttribute, UniformTag};
use super::stage::RenderStage;
use crate::errors::{Result, StrataError};

/// One `<Stages>` entry of a pass description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassStageEntry {
    /// Path of the stage-description file, as written (without extension).
    pub path: String,
    /// Pass name, i.e. the last path segment.
    pub name: String,
    pub stage: RenderStage,
    pub ordinal: u32,
}

/// One `<FBOs>` entry of a pass description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassFboEntry {
    pub name: String,
    pub stage: RenderStage,
}

/// One `<Buffers>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassBufferEntry {
    pub name: String,
    pub kind: BufferKind,
}

/// A parsed render-pass description.
#[derive(Debug, Clone, Default)]
pub struct PassDescription {
    pub stages: Vec<PassStageEntry>,
    pub fbos: Vec<PassFboEntry>,
    pub buffers: Vec<PassBufferEntry>,
}

/// A parsed shader-stage description.
#[derive(Debug, Clone, Default)]
pub struct StageDescription {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub compute: Option<String>,
    pub inputs: Vec<InputAttribute>,
    /// In declaration order; the order defines the uniform-block layout.
    pub uniforms: Vec<(String, UniformTag)>,
    pub buffers: Vec<(String, BufferKind)>,
}

/// Parse a render-pass description.
///
/// `path` is used for error reporting only.
pub fn parse_pass_description(path: &str, text: &str) -> Result<PassDescription> {
    let mut description = PassDescription::default();
    let mut lines = numbered_lines(text);

    while let Some((line_no, token)) = lines.next() {
        match token.to_ascii_lowercase().as_str() {
            "<stages>" => {
                for (line_no, entry) in section(&mut lines, "</stages>") {
                    let (name, bracket, value) = split_entry(path, line_no, &entry)?;
                    let stage = parse_stage_index(path, line_no, &bracket)?;
                    let ordinal = parse_number(path, line_no, &value, "ordinal")? as u32;
                    let short = name.rsplit('/').next().unwrap_or(&name).to_string();
                    description.stages.push(PassStageEntry {
                        path: name,
                        name: short,
                        stage,
                        ordinal,
                    });
                }
            }
            "<fbos>" => {
                for (line_no, entry) in section(&mut lines, "</fbos>") {
                    let Some((name, value)) = entry.split_once('=') else {
                        return Err(parse_error(path, line_no, "expected name=stage"));
                    };
                    let stage = parse_stage_index(path, line_no, value.trim())?;
                    description.fbos.push(PassFboEntry {
                        name: name.trim().to_string(),
                        stage,
                    });
                }
            }
            "<buffers>" => {
                for (line_no, entry) in section(&mut lines, "</buffers>") {
                    let (name, kind) = parse_buffer_entry(path, line_no, &entry)?;
                    description.buffers.push(PassBufferEntry { name, kind });
                }
            }
            _ if token.starts_with('<') => {
                return Err(parse_error(path, line_no, format!("unknown section {token}")));
            }
            _ => {}
        }
    }
    Ok(description)
}

/// Parse a shader-stage description.
pub fn parse_stage_description(path: &str, text: &str) -> Result<StageDescription> {
    let mut description = StageDescription::default();
    let mut lines = numbered_lines(text);

    while let Some((line_no, token)) = lines.next() {
        match token.to_ascii_lowercase().as_str() {
            "<vertex>" => description.vertex = Some(source_line(path, &mut lines, line_no)?),
            "<fragment>" => description.fragment = Some(source_line(path, &mut lines, line_no)?),
            "<compute>" => {
                if description.vertex.is_some() || description.fragment.is_some() {
                    return Err(parse_error(
                        path,
                        line_no,
                        "cannot mix a compute shader into a graphics pipeline",
                    ));
                }
                description.compute = Some(source_line(path, &mut lines, line_no)?);
            }
            "<in>" => {
                for (line_no, entry) in section(&mut lines, "</in>") {
                    let (name, bracket, value) = split_entry(path, line_no, &entry)?;
                    let components = parse_number(path, line_no, &bracket, "component count")?;
                    let location = parse_number(path, line_no, &value, "location")?;
                    description.inputs.push(InputAttribute {
                        name,
                        location: location as u32,
                        components: components as u32,
                    });
                }
            }
            "<uniform>" => {
                for (line_no, entry) in section(&mut lines, "</uniform>") {
                    let (name, bracket) = split_bracketed(path, line_no, &entry)?;
                    let Some(tag) = UniformTag::from_token(&bracket.to_ascii_lowercase()) else {
                        return Err(parse_error(
                            path,
                            line_no,
                            format!("unknown uniform size tag [{bracket}]"),
                        ));
                    };
                    description.uniforms.push((name, tag));
                }
            }
            "<buffers>" => {
                for (line_no, entry) in section(&mut lines, "</buffers>") {
                    let (name, kind) = parse_buffer_entry(path, line_no, &entry)?;
                    description.buffers.push((name, kind));
                }
            }
            _ if token.starts_with('<') => {
                return Err(parse_error(path, line_no, format!("unknown section {token}")));
            }
            _ => {}
        }
    }

    if description.vertex.is_none()
        && description.fragment.is_none()
        && description.compute.is_none()
    {
        return Err(parse_error(path, 1, "description names no shader sources"));
    }
    Ok(description)
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

type NumberedLine = (usize, String);

fn numbered_lines(text: &str) -> impl Iterator<Item = NumberedLine> + '_ {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim().to_string()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Drain entries until the closing tag (case-insensitive).
fn section<'a>(
    lines: &'a mut impl Iterator<Item = NumberedLine>,
    close: &'a str,
) -> impl Iterator<Item = NumberedLine> + 'a {
    lines.take_while(move |(_, line)| !line.eq_ignore_ascii_case(close))
}

fn source_line(
    path: &str,
    lines: &mut impl Iterator<Item = NumberedLine>,
    line_no: usize,
) -> Result<String> {
    lines
        .next()
        .map(|(_, line)| line)
        .ok_or_else(|| parse_error(path, line_no, "expected a source path after section tag"))
}

/// Split `name[bracket]=value`.
fn split_entry(path: &str, line_no: usize, entry: &str) -> Result<(String, String, String)> {
    let (name, bracket) = split_bracketed(path, line_no, entry)?;
    let close = entry.rfind(']').unwrap_or(0);
    let value = entry[close + 1..]
        .trim()
        .strip_prefix('=')
        .ok_or_else(|| parse_error(path, line_no, "expected '=' after bracket"))?
        .trim()
        .to_string();
    Ok((name, bracket, value))
}

fn parse_error(path: &str, line: usize, message: impl Into<String>) -> StrataError {
    StrataError::DescriptionParse {
        path: path.to_string(),
        line,
        message: message.into(),
    }
}

fn parse_number(path: &str, line_no: usize, token: &str, what: &str) -> Result<i64> {
    token
        .trim()
        .parse::<i64>()
        .map_err(|_| parse_error(path, line_no, format!("expected {what}, found '{token}'")))
}

fn parse_stage_index(path: &str, line_no: usize, token: &str) -> Result<RenderStage> {
    let index = parse_number(path, line_no, token, "stage index")?;
    RenderStage::from_index(index)
        .ok_or_else(|| parse_error(path, line_no, format!("stage index {index} out of range")))
}

/// Split `name[inner]` (no equals part).
fn split_bracketed(path: &str, line_no: usize, entry: &str) -> Result<(String, String)> {
    let open = entry
        .find('[')
        .ok_or_else(|| parse_error(path, line_no, "expected name[value]"))?;
    let close = entry
        .rfind(']')
        .filter(|&c| c > open)
        .ok_or_else(|| parse_error(path, line_no, "unterminated bracket"))?;
    Ok((
        entry[..open].trim().to_string(),
        entry[open + 1..close].trim().to_string(),
    ))
}

fn parse_buffer_entry(path: &str, line_no: usize, entry: &str) -> Result<(String, BufferKind)> {
    let (name, id_token) = split_bracketed(path, line_no, entry)?;
    let id = parse_number(path, line_no, &id_token, "buffer type id")?;
    let kind = BufferKind::from_id(id)
        .ok_or_else(|| parse_error(path, line_no, format!("unknown buffer type id {id}")))?;
    Ok((name, kind))
}

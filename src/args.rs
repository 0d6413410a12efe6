//! A hand-written parser for linker arguments. We don't use a 3rd party
//! library because the semantics are position-dependent: flags like
//! `--as-needed` and `-Bstatic` mutate a current attribute record that gets
//! snapshotted onto each input that follows.

use crate::attributes::AttrId;
use crate::attributes::Attribute;
use crate::attributes::AttributeFactory;
use crate::error::ErrorKind;
use crate::error::LinkError;
use crate::error::Result;
use crate::linker_script;
use crate::linker_script::Expr;
use anyhow::bail;
use std::path::Path;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Exec,
    DynObj,
    Object,
    Unknown,
}

/// Host facts the original kept in file-static mutables.
#[derive(Clone, Debug)]
pub struct HostPlatform {
    pub static_library_extension: &'static str,
    pub shared_library_extension: &'static str,
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self {
            static_library_extension: ".a",
            shared_library_extension: ".so",
        }
    }
}

#[derive(Debug)]
pub struct LinkerConfig {
    pub output_kind: OutputKind,
    pub output: PathBuf,
    pub soname: Option<String>,
    pub entry: Option<String>,
    pub dynamic_linker: Option<PathBuf>,
    pub defsyms: Vec<(String, Expr)>,
    pub lib_search_path: Vec<PathBuf>,
    pub host: HostPlatform,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            output_kind: OutputKind::Exec,
            output: PathBuf::from("a.out"),
            soname: None,
            entry: None,
            dynamic_linker: None,
            defsyms: Vec::new(),
            lib_search_path: Vec::new(),
            host: HostPlatform::default(),
        }
    }
}

impl LinkerConfig {
    /// The DT_SONAME value: an explicit -soname, else the output file name.
    pub fn soname(&self) -> String {
        if let Some(soname) = &self.soname {
            return soname.clone();
        }
        basename(&self.output)
    }

    pub fn entry_symbol(&self) -> &str {
        self.entry.as_deref().unwrap_or("_start")
    }

    /// File names a `-l` namespec would be looked up under, in search order.
    pub fn lib_filenames(&self, name: &str, attr: &Attribute) -> Vec<String> {
        let host = &self.host;
        if attr.is_static {
            vec![format!("lib{name}{}", host.static_library_extension)]
        } else {
            vec![
                format!("lib{name}{}", host.shared_library_extension),
                format!("lib{name}{}", host.static_library_extension),
            ]
        }
    }
}

/// One position on the input command line. File and Lib carry the attribute
/// snapshot that was current when they appeared.
#[derive(Debug, PartialEq, Eq)]
pub enum InputCommand {
    File { path: PathBuf, attr: AttrId },
    Lib { name: String, attr: AttrId },
    GroupBegin,
    GroupEnd,
}

#[derive(Debug)]
pub struct CommandLine {
    pub config: LinkerConfig,
    pub inputs: Vec<InputCommand>,
    pub attrs: AttributeFactory,
}

/// Parses linker arguments (excluding the program name).
pub fn parse<S: AsRef<str>, I: IntoIterator<Item = S>>(args: I) -> Result<CommandLine> {
    let mut args = args.into_iter();
    let mut config = LinkerConfig::default();
    let mut attrs = AttributeFactory::new();
    let mut inputs = Vec::new();
    let mut group_depth = 0u32;

    let next_value = |args: &mut I::IntoIter, flag: &str| -> Result<String> {
        match args.next() {
            Some(v) => Ok(v.as_ref().to_owned()),
            None => bail!("missing argument to {flag}"),
        }
    };

    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        if let Some(rest) = arg.strip_prefix("-L") {
            let dir = if rest.is_empty() {
                next_value(&mut args, "-L")?
            } else {
                rest.to_owned()
            };
            config.lib_search_path.push(PathBuf::from(dir));
        } else if let Some(rest) = arg.strip_prefix("-l") {
            let name = if rest.is_empty() {
                next_value(&mut args, "-l")?
            } else {
                rest.to_owned()
            };
            inputs.push(InputCommand::Lib {
                name,
                attr: attrs.snapshot(),
            });
        } else if arg == "-o" {
            config.output = PathBuf::from(next_value(&mut args, "-o")?);
        } else if arg == "-shared" || arg == "-Bshareable" {
            config.output_kind = OutputKind::DynObj;
        } else if arg == "-r" || arg == "--relocatable" {
            bail!(LinkError::new(
                ErrorKind::UnsupportedOutputType,
                "relocatable output is not supported",
                arg,
            ));
        } else if arg == "-e" || arg == "--entry" {
            config.entry = Some(next_value(&mut args, "-e")?);
        } else if let Some(rest) = arg.strip_prefix("--entry=") {
            config.entry = Some(rest.to_owned());
        } else if arg == "-soname" || arg == "-h" {
            config.soname = Some(next_value(&mut args, "-soname")?);
        } else if let Some(rest) = arg.strip_prefix("-soname=") {
            config.soname = Some(rest.to_owned());
        } else if arg == "--dynamic-linker" || arg == "-dynamic-linker" {
            config.dynamic_linker = Some(PathBuf::from(next_value(&mut args, "--dynamic-linker")?));
        } else if arg == "-Bstatic" || arg == "-static" || arg == "-dn" {
            attrs.current_mut().is_static = true;
        } else if arg == "-Bdynamic" || arg == "-dy" || arg == "-call_shared" {
            attrs.current_mut().is_static = false;
        } else if arg == "--whole-archive" {
            attrs.current_mut().whole_archive = true;
        } else if arg == "--no-whole-archive" {
            attrs.current_mut().whole_archive = false;
        } else if arg == "--as-needed" {
            attrs.current_mut().as_needed = true;
        } else if arg == "--no-as-needed" {
            attrs.current_mut().as_needed = false;
        } else if arg == "--add-needed" {
            attrs.current_mut().add_needed = true;
        } else if arg == "--no-add-needed" {
            attrs.current_mut().add_needed = false;
        } else if arg == "--start-group" || arg == "-(" {
            group_depth += 1;
            inputs.push(InputCommand::GroupBegin);
        } else if arg == "--end-group" || arg == "-)" {
            if group_depth == 0 {
                bail!("--end-group without matching --start-group");
            }
            group_depth -= 1;
            inputs.push(InputCommand::GroupEnd);
        } else if arg == "--defsym" {
            let value = next_value(&mut args, "--defsym")?;
            config.defsyms.push(linker_script::parse_defsym(&value)?);
        } else if let Some(rest) = arg.strip_prefix("--defsym=") {
            config.defsyms.push(linker_script::parse_defsym(rest)?);
        } else if arg.starts_with('-') && arg != "-" {
            bail!("unrecognized argument `{arg}`");
        } else {
            inputs.push(InputCommand::File {
                path: PathBuf::from(arg),
                attr: attrs.snapshot(),
            });
        }
    }

    if group_depth != 0 {
        bail!("--start-group without matching --end-group");
    }
    Ok(CommandLine {
        config,
        inputs,
        attrs,
    })
}

pub(crate) fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

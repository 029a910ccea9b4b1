//! Interface de linha de comando do Bifrost baseada em clap.
//!
//! Define a struct [`Cli`] com as flags globais (--config, --timeout,
//! --poll-interval, --json, --verbose) e um [`Command`] por operação.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::ConfigKey;
use crate::kobo::{ExportFormat, ExportSpec, MultipleSelect};

/// Bifrost: cria, atualiza, publica e exporta formulários do KoboToolbox.
#[derive(Debug, Parser)]
#[command(name = "bifrost", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração a usar no lugar do local padrão.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Segundos entre duas consultas de status de uma importação ou exportação.
    #[arg(long, global = true)]
    pub poll_interval: Option<u64>,

    /// Desiste de uma importação ou exportação após esta quantidade de segundos.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Imprime os resultados como linhas JSON em vez de texto.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Habilita logs de depuração no stderr.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lista todos os formulários da conta.
    List,

    /// Cria um novo formulário em rascunho a partir de um XLSForm.
    Create {
        /// Caminho do XLSForm (.xls, .xlsx ou .csv).
        file: PathBuf,

        /// Publica o formulário logo após criá-lo.
        #[arg(long)]
        deploy: bool,
    },

    /// Substitui o conteúdo de um formulário existente.
    Update {
        asset_id: String,

        /// Caminho do XLSForm (.xls, .xlsx ou .csv).
        file: PathBuf,

        /// Republica o formulário logo após atualizá-lo.
        #[arg(long)]
        redeploy: bool,
    },

    /// Publica um formulário em rascunho.
    Deploy { asset_id: String },

    /// Publica a versão mais recente de um formulário já publicado.
    Redeploy { asset_id: String },

    /// Remove um formulário.
    Delete { asset_id: String },

    /// Exporta os dados coletados para um arquivo local.
    Export(ExportArgs),

    /// Permite envios ao formulário sem autenticação.
    SubmitWithoutAuth { asset_id: String },

    /// Copia todas as permissões de um formulário para outro.
    ClonePermissions {
        /// Formulário que recebe as permissões.
        target_id: String,
        /// Formulário cujas permissões são copiadas.
        source_id: String,
    },

    /// Consulta ou altera o arquivo de configuração.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Grava um valor.
    Set {
        #[arg(value_enum)]
        key: ConfigKey,
        value: String,
    },
    /// Mostra a configuração efetiva (token mascarado).
    Show,
    /// Mostra o local do arquivo de configuração.
    Path,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Csv,
    Xls,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Xls => ExportFormat::Xls,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MultipleSelectArg {
    /// Uma coluna com todas as escolhas e uma coluna por escolha.
    Both,
    /// Uma coluna com todas as escolhas selecionadas.
    Summary,
    /// Uma coluna por escolha.
    Details,
}

impl From<MultipleSelectArg> for MultipleSelect {
    fn from(arg: MultipleSelectArg) -> Self {
        match arg {
            MultipleSelectArg::Both => MultipleSelect::Both,
            MultipleSelectArg::Summary => MultipleSelect::Summary,
            MultipleSelectArg::Details => MultipleSelect::Details,
        }
    }
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    pub asset_id: String,

    /// Arquivo de destino. Padrão: `<downloads_dir>/<asset_id>.<ext>`.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
    pub format: FormatArg,

    /// Exporta apenas estas perguntas (repita a flag ou separe por vírgula).
    #[arg(long = "field", value_delimiter = ',')]
    pub fields: Vec<String>,

    /// Idioma dos rótulos; `_xml` exporta os nomes das perguntas.
    #[arg(long, default_value = "_default")]
    pub lang: String,

    /// Separador entre nomes de grupo e de pergunta.
    #[arg(long, default_value = "/")]
    pub group_sep: String,

    #[arg(long, value_enum, default_value_t = MultipleSelectArg::Both)]
    pub multiple_select: MultipleSelectArg,

    /// Prefixa os rótulos com a hierarquia de grupos.
    #[arg(long)]
    pub hierarchy_in_labels: bool,

    /// Inclui apenas as perguntas da versão publicada.
    #[arg(long)]
    pub latest_version_only: bool,

    /// Omite as colunas de URL de mídia.
    #[arg(long)]
    pub no_media_urls: bool,

    /// Mantém as células XLS como texto em vez de valores tipados.
    #[arg(long)]
    pub xls_types_as_text: bool,
}

impl ExportArgs {
    pub fn destination(&self, downloads_dir: &Path) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => {
                let extension = ExportFormat::from(self.format).extension();
                downloads_dir.join(format!("{}.{extension}", self.asset_id.trim()))
            }
        }
    }

    pub fn spec(&self) -> ExportSpec {
        ExportSpec {
            format: self.format.into(),
            fields: self.fields.clone(),
            fields_from_all_versions: !self.latest_version_only,
            group_sep: self.group_sep.clone(),
            hierarchy_in_labels: self.hierarchy_in_labels,
            lang: self.lang.clone(),
            multiple_select: self.multiple_select.into(),
            include_media_url: !self.no_media_urls,
            xls_types_as_text: self.xls_types_as_text,
        }
    }
}

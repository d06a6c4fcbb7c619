//! `CREATE TABLE` parser.
//!
//! Turns stored definition text into a [`TableDefinition`]. Column and table
//! constraints are recognized structurally; expressions (defaults, checks,
//! generated columns) are kept as normalized text. Conflict clauses and key
//! ordering on constraints are accepted but not retained.

use thiserror::Error;

use super::column::{ColumnDef, GeneratedColumn};
use super::constraint::{
    CheckConstraint, ForeignKeyDef, PrimaryKeyDef, ReferentialAction, UniqueConstraint,
};
use super::lexer::{render_tokens, tokenize, unquote, Token, TokenKind};
use super::table::TableDefinition;

/// Definition text that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at byte {offset})")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the parsed text.
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a `CREATE TABLE` statement into a structured definition.
pub fn parse_create_table(sql: &str) -> Result<TableDefinition> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        len: sql.len(),
    };
    let mut def = parser.create_table()?;
    def.raw_sql = Some(sql.to_string());
    Ok(def)
}

const COLUMN_CONSTRAINT_WORDS: &[&str] = &[
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
];

const TABLE_CONSTRAINT_WORDS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    len: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.start).unwrap_or(self.len)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.offset())
    }

    fn at_word(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_word(keyword))
    }

    fn at_punct(&self, punct: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(punct))
    }

    fn eat_word(&mut self, keyword: &str) -> bool {
        if self.at_word(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, keyword: &str) -> Result<()> {
        if self.eat_word(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", keyword)))
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", punct)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::String => {
                self.pos += 1;
                Ok(unquote(&t.text))
            }
            Some(t) => match t.ident() {
                Some(name) => {
                    self.pos += 1;
                    Ok(name)
                }
                None => Err(self.error(format!("expected identifier, found `{}`", t.text))),
            },
            None => Err(self.error("expected identifier")),
        }
    }

    /// `[schema.]name`, keeping only the name.
    fn qualified_name(&mut self) -> Result<String> {
        let name = self.ident()?;
        if self.eat_punct(".") {
            return self.ident();
        }
        Ok(name)
    }

    /// Consume a parenthesized group and return the tokens inside it.
    fn group(&mut self) -> Result<&'t [Token]> {
        let open = self.offset();
        self.expect_punct("(")?;
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(token) = self.advance() {
            if token.is_punct("(") {
                depth += 1;
            } else if token.is_punct(")") {
                depth -= 1;
                if depth == 0 {
                    return Ok(&self.tokens[start..self.pos - 1]);
                }
            }
        }
        Err(ParseError::new("unbalanced parentheses", open))
    }

    fn name_list(&mut self) -> Result<Vec<String>> {
        self.expect_punct("(")?;
        let mut names = Vec::new();
        loop {
            names.push(self.ident()?);
            if self.eat_word("COLLATE") {
                self.ident()?;
            }
            if !self.eat_word("ASC") {
                self.eat_word("DESC");
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            return Ok(names);
        }
    }

    fn conflict_clause(&mut self) -> Result<()> {
        if self.at_word("ON") && self.peek_at(1).is_some_and(|t| t.is_word("CONFLICT")) {
            self.pos += 2;
            self.ident()?;
        }
        Ok(())
    }

    fn create_table(&mut self) -> Result<TableDefinition> {
        self.expect_word("CREATE")?;
        if !self.eat_word("TEMP") {
            self.eat_word("TEMPORARY");
        }
        self.expect_word("TABLE")?;
        if self.eat_word("IF") {
            self.expect_word("NOT")?;
            self.expect_word("EXISTS")?;
        }
        let name = self.qualified_name()?;
        if self.at_word("AS") {
            return Err(self.error("CREATE TABLE ... AS SELECT carries no column definitions"));
        }

        let mut def = TableDefinition::new(name);
        self.expect_punct("(")?;
        loop {
            if TABLE_CONSTRAINT_WORDS.iter().any(|w| self.at_word(w)) {
                self.table_constraint(&mut def)?;
            } else {
                self.column(&mut def)?;
            }
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            break;
        }
        self.table_options(&mut def)?;
        self.eat_punct(";");
        if self.peek().is_some() {
            return Err(self.error("unexpected input after table definition"));
        }
        if def.columns.is_empty() {
            return Err(ParseError::new("table has no columns", 0));
        }
        Ok(def)
    }

    fn column(&mut self, def: &mut TableDefinition) -> Result<()> {
        let mut column = ColumnDef::new(self.ident()?, "");

        let type_start = self.pos;
        while let Some(t) = self.peek() {
            if t.is_punct(",")
                || t.is_punct(")")
                || COLUMN_CONSTRAINT_WORDS.iter().any(|w| t.is_word(w))
            {
                break;
            }
            if t.is_punct("(") {
                self.group()?;
            } else {
                self.pos += 1;
            }
        }
        if self.pos > type_start {
            column.declared_type = Some(render_tokens(&self.tokens[type_start..self.pos]));
        }

        let mut constraint_name: Option<String> = None;
        while let Some(t) = self.peek() {
            if t.is_punct(",") || t.is_punct(")") {
                break;
            }
            if self.eat_word("CONSTRAINT") {
                constraint_name = Some(self.ident()?);
                continue;
            }

            if self.eat_word("PRIMARY") {
                self.expect_word("KEY")?;
                if !self.eat_word("ASC") {
                    self.eat_word("DESC");
                }
                self.conflict_clause()?;
                column.primary_key = true;
                column.autoincrement = self.eat_word("AUTOINCREMENT");
            } else if self.eat_word("NOT") {
                self.expect_word("NULL")?;
                self.conflict_clause()?;
                column.not_null = true;
            } else if self.eat_word("NULL") {
                self.conflict_clause()?;
            } else if self.eat_word("UNIQUE") {
                self.conflict_clause()?;
                column.unique = true;
            } else if self.eat_word("CHECK") {
                let expression = render_tokens(self.group()?);
                column.checks.push(CheckConstraint {
                    name: constraint_name.take(),
                    expression,
                });
            } else if self.eat_word("DEFAULT") {
                column.default = Some(self.default_value()?);
            } else if self.eat_word("COLLATE") {
                column.collation = Some(self.ident()?);
            } else if self.eat_word("REFERENCES") {
                let mut fk = self.references(vec![column.name.clone()])?;
                fk.name = constraint_name.take();
                def.foreign_keys.push(fk);
            } else if self.at_word("GENERATED") || self.at_word("AS") {
                if self.eat_word("GENERATED") {
                    self.expect_word("ALWAYS")?;
                }
                self.expect_word("AS")?;
                let expression = render_tokens(self.group()?);
                let stored = if self.eat_word("STORED") {
                    true
                } else {
                    self.eat_word("VIRTUAL");
                    false
                };
                column.generated = Some(GeneratedColumn { expression, stored });
            } else {
                return Err(self.error(format!(
                    "unexpected `{}` in definition of column {}",
                    t.text, column.name
                )));
            }
            constraint_name = None;
        }

        def.columns.push(column);
        Ok(())
    }

    fn default_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(t) if t.is_punct("(") => {
                let inner = self.group()?;
                Ok(format!("({})", render_tokens(inner)))
            }
            Some(t) if t.is_punct("-") || t.is_punct("+") => {
                self.pos += 1;
                match self.advance() {
                    Some(n) if n.kind == TokenKind::Number => Ok(format!("{}{}", t.text, n.text)),
                    _ => Err(self.error("expected number after sign in default")),
                }
            }
            Some(t) if t.kind != TokenKind::Punct => {
                self.pos += 1;
                Ok(t.text.clone())
            }
            _ => Err(self.error("expected default value")),
        }
    }

    fn references(&mut self, columns: Vec<String>) -> Result<ForeignKeyDef> {
        let references_table = self.ident()?;
        let references_columns = if self.at_punct("(") {
            self.name_list()?
        } else {
            Vec::new()
        };
        let mut fk = ForeignKeyDef {
            name: None,
            columns,
            references_table,
            references_columns,
            on_delete: None,
            on_update: None,
            deferred: false,
        };

        loop {
            if self.eat_word("ON") {
                if self.eat_word("DELETE") {
                    fk.on_delete = Some(self.referential_action()?);
                } else if self.eat_word("UPDATE") {
                    fk.on_update = Some(self.referential_action()?);
                } else {
                    return Err(self.error("expected DELETE or UPDATE"));
                }
            } else if self.eat_word("MATCH") {
                self.ident()?;
            } else if self.at_word("NOT")
                && self.peek_at(1).is_some_and(|t| t.is_word("DEFERRABLE"))
            {
                self.pos += 2;
                self.initially_deferred()?;
            } else if self.eat_word("DEFERRABLE") {
                fk.deferred = self.initially_deferred()?;
            } else {
                return Ok(fk);
            }
        }
    }

    fn initially_deferred(&mut self) -> Result<bool> {
        if self.eat_word("INITIALLY") {
            if self.eat_word("DEFERRED") {
                return Ok(true);
            }
            self.expect_word("IMMEDIATE")?;
        }
        Ok(false)
    }

    fn referential_action(&mut self) -> Result<ReferentialAction> {
        if self.eat_word("SET") {
            if self.eat_word("NULL") {
                return Ok(ReferentialAction::SetNull);
            }
            self.expect_word("DEFAULT")?;
            return Ok(ReferentialAction::SetDefault);
        }
        if self.eat_word("CASCADE") {
            return Ok(ReferentialAction::Cascade);
        }
        if self.eat_word("RESTRICT") {
            return Ok(ReferentialAction::Restrict);
        }
        if self.eat_word("NO") {
            self.expect_word("ACTION")?;
            return Ok(ReferentialAction::NoAction);
        }
        Err(self.error("expected referential action"))
    }

    fn table_constraint(&mut self, def: &mut TableDefinition) -> Result<()> {
        let name = if self.eat_word("CONSTRAINT") {
            Some(self.ident()?)
        } else {
            None
        };

        if self.eat_word("PRIMARY") {
            self.expect_word("KEY")?;
            let columns = self.name_list()?;
            self.conflict_clause()?;
            def.primary_key = Some(PrimaryKeyDef { name, columns });
        } else if self.eat_word("UNIQUE") {
            let columns = self.name_list()?;
            self.conflict_clause()?;
            def.unique_constraints
                .push(UniqueConstraint { name, columns });
        } else if self.eat_word("CHECK") {
            let expression = render_tokens(self.group()?);
            def.checks.push(CheckConstraint { name, expression });
        } else if self.eat_word("FOREIGN") {
            self.expect_word("KEY")?;
            let columns = self.name_list()?;
            self.expect_word("REFERENCES")?;
            let mut fk = self.references(columns)?;
            fk.name = name;
            def.foreign_keys.push(fk);
        } else {
            return Err(self.error("expected table constraint"));
        }
        Ok(())
    }

    fn table_options(&mut self, def: &mut TableDefinition) -> Result<()> {
        loop {
            if self.eat_word("WITHOUT") {
                self.expect_word("ROWID")?;
                def.without_rowid = true;
            } else if self.eat_word("STRICT") {
                def.strict = true;
            } else {
                return Ok(());
            }
            if !self.eat_punct(",") {
                return Ok(());
            }
        }
    }
}

use l0_error::{
   Error,
   Kind,
   Position,
   Result,
};
use l0_value::{
   Arena,
   ValueRef,
};

/// Parses every top-level expression in `source` into a proper list.
/// Empty or comment-only input yields the empty list.
pub fn parse_all(arena: &mut Arena, source: &str) -> Result<ValueRef> {
   let mut reader = Reader::new(source);
   let mut forms = Vec::new();

   loop {
      reader.skip_trivia();

      if reader.peek_character().is_none() {
         break;
      }

      forms.push(reader.expression(arena)?);
   }

   log::debug!("parsed {count} top-level form(s)", count = forms.len());
   Ok(arena.list(&forms))
}

/// Parses a single expression, returning it together with the byte offset
/// of the remaining input (trailing trivia skipped). `None` when the
/// source holds no expression at all.
pub fn parse_one(arena: &mut Arena, source: &str) -> Result<Option<(ValueRef, usize)>> {
   let mut reader = Reader::new(source);

   reader.skip_trivia();
   if reader.peek_character().is_none() {
      return Ok(None);
   }

   let expression = reader.expression(arena)?;
   reader.skip_trivia();

   Ok(Some((expression, reader.offset)))
}

fn is_symbol_start(c: char) -> bool {
   c.is_alphabetic()
      || matches!(c, '_' | '+' | '-' | '*' | '/' | '=' | '!' | '?' | '<' | '>' | ':' | '.')
}

fn is_symbol_continue(c: char) -> bool {
   is_symbol_start(c) || c.is_ascii_digit()
}

/// Whitespace, `)`, `;`, or end of input close off an atom.
fn is_terminator(c: Option<char>) -> bool {
   match c {
      None => true,
      Some(c) => c.is_whitespace() || c == ')' || c == ';',
   }
}

struct Reader<'a> {
   source: &'a str,
   offset: usize,

   line:   u32,
   column: u32,
}

impl<'a> Reader<'a> {
   fn new(source: &'a str) -> Self {
      Self {
         source,
         offset: 0,

         line: 1,
         column: 1,
      }
   }

   fn position(&self) -> Position {
      Position::new(self.line, self.column)
   }

   fn remaining(&self) -> &'a str {
      &self.source[self.offset..]
   }

   fn peek_character(&self) -> Option<char> {
      self.remaining().chars().next()
   }

   fn consume_character(&mut self) -> Option<char> {
      let next = self.peek_character()?;
      self.offset += next.len_utf8();

      if next == '\n' {
         self.line += 1;
         self.column = 1;
      } else {
         self.column += 1;
      }

      Some(next)
   }

   fn consume_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
      let start = self.offset;

      while self.peek_character().is_some_and(&predicate) {
         self.consume_character();
      }

      &self.source[start..self.offset]
   }

   fn skip_trivia(&mut self) {
      loop {
         self.consume_while(char::is_whitespace);

         if self.peek_character() == Some(';') {
            self.consume_while(|c| c != '\n');
            continue;
         }

         break;
      }
   }

   fn error(&self, kind: Kind, message: impl Into<String>) -> Error {
      Error::new(kind, message).at(self.position())
   }

   fn expression(&mut self, arena: &mut Arena) -> Result<ValueRef> {
      self.skip_trivia();

      match self.peek_character() {
         None => {
            Err(self.error(Kind::UnexpectedEof, "Unexpected end of input"))
         },

         Some('(') => self.list(arena),

         Some(')') => {
            Err(self.error(Kind::InvalidSyntax, "Unexpected closing parenthesis ')'"))
         },

         Some('\'') => self.sugared(arena, "quote", "'"),
         Some('`') => self.sugared(arena, "quasiquote", "`"),

         Some(',') => {
            self.consume_character();

            if self.peek_character() == Some('@') {
               self.consume_character();
               self.sugared_tail(arena, "unquote-splicing", ",@")
            } else {
               self.sugared_tail(arena, "unquote", ",")
            }
         },

         Some('"') => self.string(arena),

         Some(_) => self.atom(arena),
      }
   }

   /// `'x` and friends: consume the sigil, then wrap the next expression.
   fn sugared(&mut self, arena: &mut Arena, name: &str, sigil: &str) -> Result<ValueRef> {
      self.consume_character();
      self.sugared_tail(arena, name, sigil)
   }

   fn sugared_tail(&mut self, arena: &mut Arena, name: &str, sigil: &str) -> Result<ValueRef> {
      self.skip_trivia();

      if self.peek_character().is_none() {
         return Err(self.error(
            Kind::UnexpectedEof,
            format!("Unexpected end of input after {sigil}"),
         ));
      }

      let wrapped = self.expression(arena)?;
      let head = arena.symbol(name);
      let tail = arena.list(&[wrapped]);
      Ok(arena.pair(head, tail))
   }

   fn list(&mut self, arena: &mut Arena) -> Result<ValueRef> {
      self.consume_character(); // (

      let mut elements = Vec::new();

      loop {
         self.skip_trivia();

         match self.peek_character() {
            Some(')') => {
               self.consume_character();
               return Ok(arena.list(&elements));
            },

            None => {
               return Err(self.error(Kind::UnexpectedEof, "Unexpected end of input inside list"));
            },

            Some(_) => elements.push(self.expression(arena)?),
         }
      }
   }

   fn string(&mut self, arena: &mut Arena) -> Result<ValueRef> {
      let start = self.position();

      self.consume_character(); // "

      let mut content = String::new();

      loop {
         match self.consume_character() {
            None => {
               return Err(Error::new(Kind::UnexpectedEof, "Unterminated string literal").at(start));
            },

            Some('"') => break,

            Some('\\') => {
               match self.consume_character() {
                  None => {
                     return Err(
                        Error::new(Kind::UnexpectedEof, "Unterminated string literal").at(start),
                     );
                  },

                  Some('\\') => content.push('\\'),
                  Some('"') => content.push('"'),
                  Some('n') => content.push('\n'),
                  Some('t') => content.push('\t'),

                  // Unknown escapes keep the backslash and the character.
                  Some(other) => {
                     content.push('\\');
                     content.push(other);
                  },
               }
            },

            Some(c) => content.push(c),
         }
      }

      Ok(arena.string(&content))
   }

   fn atom(&mut self, arena: &mut Arena) -> Result<ValueRef> {
      let start = self.position();
      let token = self.peek_token();

      // A signed decimal integer closed off by a terminator.
      if let Some(integer) = recognize_integer(token) {
         self.consume_token(token);
         return Ok(arena.integer(integer));
      }

      // Otherwise a float, if the token says so and parses as one.
      if token.contains(['.', 'e', 'E'])
         && let Ok(float) = token.parse::<f64>()
      {
         self.consume_token(token);
         return Ok(arena.float(float));
      }

      if token == "#t" || token == "#f" {
         self.consume_token(token);
         return Ok(arena.boolean(token == "#t"));
      }

      if token.chars().next().is_some_and(is_symbol_start)
         && token.chars().skip(1).all(is_symbol_continue)
      {
         self.consume_token(token);
         return Ok(arena.symbol(token));
      }

      Err(Error::new(
         Kind::InvalidSyntax,
         format!("Invalid atom starting with: {token}"),
      )
      .at(start))
   }

   /// The run of characters up to the next terminator, unconsumed.
   fn peek_token(&self) -> &'a str {
      let end = self
         .remaining()
         .char_indices()
         .find(|&(_, c)| is_terminator(Some(c)))
         .map_or(self.remaining().len(), |(at, _)| at);

      &self.remaining()[..end]
   }

   fn consume_token(&mut self, token: &str) {
      for _ in token.chars() {
         self.consume_character();
      }
   }
}

fn recognize_integer(token: &str) -> Option<i64> {
   let digits = token.strip_prefix(['+', '-']).unwrap_or(token);

   if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
      return None;
   }

   token.parse().ok()
}

#[cfg(test)]
mod tests {
   use l0_value::Value;

   use super::*;

   fn parse(source: &str) -> (Arena, ValueRef) {
      let mut arena = Arena::new();
      let list = parse_all(&mut arena, source).expect("input must parse");
      (arena, list)
   }

   fn parse_err(source: &str) -> Error {
      let mut arena = Arena::new();
      parse_all(&mut arena, source).expect_err("input must not parse")
   }

   #[test]
   fn empty_input_is_the_empty_list() {
      let (_, list) = parse("");
      assert_eq!(list, ValueRef::NIL);

      let (_, list) = parse("   ; only a comment\n  ");
      assert_eq!(list, ValueRef::NIL);
   }

   #[test]
   fn atoms() {
      let (arena, list) = parse("42 -7 +3 2.5 1e3 -1.5e-3 #t #f foo set! < ... x2");
      let shown: Vec<_> = arena
         .collect_list(list)
         .unwrap()
         .into_iter()
         .map(|form| arena.show(form).to_string())
         .collect();

      assert_eq!(shown, [
         "42", "-7", "3", "2.5", "1000", "-0.0015", "#t", "#f", "foo", "set!", "<", "...", "x2",
      ]);

      let (arena, list) = parse("1e3");
      let form = arena.car(list).unwrap();
      assert!(arena.get(form).is_float());
   }

   #[test]
   fn signs_alone_are_symbols() {
      let (mut arena, list) = parse("- +");
      let forms = arena.collect_list(list).unwrap();

      let minus = arena.intern("-");
      let plus = arena.intern("+");
      assert_eq!(arena.get(forms[0]), Value::Symbol(minus));
      assert_eq!(arena.get(forms[1]), Value::Symbol(plus));
   }

   #[test]
   fn lists_nest() {
      let (arena, list) = parse("(+ 1 (list 2 3))");
      let form = arena.car(list).unwrap();

      assert_eq!(arena.show(form).to_string(), "(+ 1 (list 2 3))");
   }

   #[test]
   fn dotted_input_is_a_three_element_list() {
      // `.` is a symbol character, so no pair syntax exists.
      let (arena, list) = parse("(a . b)");
      let form = arena.car(list).unwrap();

      assert_eq!(arena.list_len(form), Some(3));
      assert_eq!(arena.show(form).to_string(), "(a . b)");
   }

   #[test]
   fn string_escapes() {
      let (arena, list) = parse(r#""a\"b" "line\nbreak" "tab\there" "back\\slash" "odd\qescape""#);
      let forms = arena.collect_list(list).unwrap();

      let texts: Vec<_> = forms
         .iter()
         .map(|&form| {
            match arena.get(form) {
               Value::String(content) => arena.text(content).to_owned(),
               other => panic!("expected a string, got {other:?}"),
            }
         })
         .collect();

      assert_eq!(texts, ["a\"b", "line\nbreak", "tab\there", "back\\slash", "odd\\qescape"]);
   }

   #[test]
   fn reader_macros_desugar() {
      let (arena, list) = parse("'x `(a ,b ,@c)");
      let forms = arena.collect_list(list).unwrap();

      assert_eq!(arena.show(forms[0]).to_string(), "(quote x)");
      assert_eq!(
         arena.show(forms[1]).to_string(),
         "(quasiquote (a (unquote b) (unquote-splicing c)))",
      );
   }

   #[test]
   fn comments_extend_to_end_of_line() {
      let (arena, list) = parse("1 ; two is skipped 2\n3");
      let forms = arena.collect_list(list).unwrap();

      assert_eq!(forms.len(), 2);
      assert_eq!(arena.get(forms[1]), Value::Integer(3));
   }

   #[test]
   fn eof_inside_list_reports_position() {
      let error = parse_err("(a\n  (b");
      assert_eq!(error.kind, Kind::UnexpectedEof);

      let position = error.position.unwrap();
      assert_eq!(position.line, 2);
      assert!(position.column >= 1);
   }

   #[test]
   fn stray_closing_parenthesis() {
      let error = parse_err(")");
      assert_eq!(error.kind, Kind::InvalidSyntax);
      assert!(error.message.contains("closing parenthesis"));
      assert_eq!(error.position.unwrap(), Position::new(1, 1));
   }

   #[test]
   fn unterminated_string() {
      let error = parse_err("\"abc");
      assert_eq!(error.kind, Kind::UnexpectedEof);
      assert!(error.message.contains("Unterminated"));
   }

   #[test]
   fn invalid_atom() {
      let error = parse_err("#true");
      assert_eq!(error.kind, Kind::InvalidSyntax);
      assert!(error.message.contains("Invalid atom starting with: #true"));
   }

   #[test]
   fn quote_at_eof() {
      let error = parse_err("'");
      assert_eq!(error.kind, Kind::UnexpectedEof);
      assert!(error.message.contains("after '"));
   }

   #[test]
   fn parse_one_reports_the_remainder() {
      let mut arena = Arena::new();

      let (form, rest) = parse_one(&mut arena, "(+ 1 2) (next)").unwrap().unwrap();
      assert_eq!(arena.show(form).to_string(), "(+ 1 2)");
      assert_eq!(&"(+ 1 2) (next)"[rest..], "(next)");

      assert_eq!(parse_one(&mut arena, "  ; nothing\n").unwrap(), None);
   }
}

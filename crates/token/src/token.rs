//! Typed tokens for the parser.
use crate::{Delimiter, Span, buffer::TokenSlice};

/// A token which can be taken from the front of a [`TokenSlice`].
pub trait Lex: Peek + Sized {
    const NAME: &'static str;

    fn lex(slice: &TokenSlice<'_>) -> Option<Self>;
}

pub trait Peek: Sized {
    fn peek(slice: &TokenSlice) -> bool;
}

/// Any identifier, keywords included since the DSL has no reserved words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl crate::Spanned for Ident {
    fn span(&self) -> Span {
        self.span
    }
}

impl Peek for Ident {
    fn peek(slice: &TokenSlice) -> bool {
        slice.ident().is_some()
    }
}

impl Lex for Ident {
    const NAME: &'static str = "identifier";

    fn lex(slice: &TokenSlice<'_>) -> Option<Self> {
        let t = slice.ident()?;
        slice.advance();
        Some(Ident {
            name: t.text.clone(),
            span: t.span,
        })
    }
}

macro_rules! impl_keywords {
    ($($kw:ident => $type:ident),*$(,)?) => {
        $(
            #[derive(Debug)]
            pub struct $type(pub $crate::Span);

            impl $crate::Spanned for $type{
                fn span(&self) -> $crate::Span{
                    self.0
                }
            }

            impl Lex for $type{
                const NAME: &'static str = stringify!($kw);

                fn lex(slice: &TokenSlice<'_>) -> Option<Self> {
                    let ident = slice.ident()?;
                    if ident.text == stringify!($kw) {
                        slice.advance();
                        Some(Self(ident.span))
                    } else {
                        None
                    }
                }
            }

            impl Peek for $type{
                fn peek(slice: &TokenSlice) -> bool {
                    slice.ident().is_some_and(|ident| ident.text == stringify!($kw))
                }
            }
        )*

        #[doc(hidden)]
        #[macro_export]
        macro_rules! T_keyword{
            $(
                ($kw) => {
                    $crate::token::$type
                };
            )*
        }
    };
}

impl_keywords! {
    inst => Inst,
    super => Super,
    family => Family,
    if => If,
}

macro_rules! impl_punct{
    ($([$punct:tt]=> $type:ident),*$(,)?) => {
        $(
        #[derive(Debug)]
        pub struct $type(pub $crate::Span);

        impl $crate::Spanned for $type{
            fn span(&self) -> $crate::Span{
                self.0
            }
        }

        impl Lex for $type{
            const NAME: &'static str = stringify!($punct);

            fn lex(slice: &TokenSlice<'_>) -> Option<Self> {
                let punct = slice.punct()?;
                if punct.text == Self::NAME {
                    slice.advance();
                    Some(Self(punct.span))
                } else {
                    None
                }
            }
        }

        impl Peek for $type{
            fn peek(slice: &TokenSlice) -> bool {
                slice.punct().is_some_and(|punct| punct.text == Self::NAME)
            }
        }
        )*

        /// Macro used for token shorthands.
        #[macro_export]
        macro_rules! T{
            $(
                ($punct) => {
                    $crate::token::$type
                };
            )*
            ($t:tt) => {
                $crate::T_keyword!($t)
            };
        }
    };
}

// The lexer never produces `=>`, so the C operators are all that is needed here.
impl_punct! {
    [&] => And,
    [&&] => AndAnd,
    [:] => Colon,
    [,] => Comma,
    [.] => Dot,
    [=] => Eq,
    [==] => EqEq,
    [!] => Exlaim,
    [!=] => ExlaimEq,
    [/] => FSlash,
    [|] => HBar,
    [||] => HBarHBar,
    [%] => Percent,
    [+] => Plus,
    [+=] => PlusEq,
    [<] => LChevron,
    [<=] => LChevronEq,
    [-] => Minus,
    [-=] => MinusEq,
    [->] => RArrow,
    [>] => RChevron,
    [>=] => RChevronEq,
    [;] => SemiColon,
    [*] => Star,
    [?] => Question,
}

/// `--`, which separates inputs from outputs in a stack effect. Not a Rust token, so it has
/// no `T!` shorthand.
#[derive(Debug)]
pub struct MinusMinus(pub Span);

impl Peek for MinusMinus {
    fn peek(slice: &TokenSlice) -> bool {
        slice.punct().is_some_and(|punct| punct.text == "--")
    }
}

impl Lex for MinusMinus {
    const NAME: &'static str = "--";

    fn lex(slice: &TokenSlice<'_>) -> Option<Self> {
        let punct = slice.punct().filter(|p| p.text == "--")?;
        slice.advance();
        Some(MinusMinus(punct.span))
    }
}

pub struct Paren;
pub struct Bracket;
pub struct Brace;

impl Peek for Paren {
    fn peek(slice: &TokenSlice) -> bool {
        slice
            .group()
            .is_some_and(|(d, _)| d == Delimiter::Parenthesis)
    }
}

impl Peek for Bracket {
    fn peek(slice: &TokenSlice) -> bool {
        slice.group().is_some_and(|(d, _)| d == Delimiter::Bracket)
    }
}

impl Peek for Brace {
    fn peek(slice: &TokenSlice) -> bool {
        slice.group().is_some_and(|(d, _)| d == Delimiter::Brace)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TokenBuffer;

    #[test]
    fn keywords_and_punct() {
        let buffer = TokenBuffer::new("inst(X, (a -- b)) ;").unwrap();
        let slice = buffer.as_slice();
        assert!(!Super::peek(&slice));
        assert!(Inst::lex(&slice).is_some());
        assert!(Paren::peek(&slice));
        let (_, inner) = slice.group().unwrap();
        assert_eq!(Ident::lex(&inner).unwrap().name, "X");
        assert!(Comma::lex(&inner).is_some());
        let (_, effect) = inner.group().unwrap();
        Ident::lex(&effect).unwrap();
        assert!(Minus::lex(&effect).is_none());
        assert!(MinusMinus::lex(&effect).is_some());
        assert_eq!(Ident::lex(&effect).unwrap().name, "b");
        slice.advance_group();
        assert!(SemiColon::lex(&slice).is_some());
        assert!(slice.is_empty());
    }
}

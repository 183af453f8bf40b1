//! Libris Catalog Dataset
//!
//! The ten books the catalog is seeded with.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::book::Book;

fn book(
    title: &str,
    author: &str,
    genre: &str,
    published_year: i64,
    price: f64,
    pages: i64,
    publisher: &str,
) -> Book {
    Book {
        title: title.to_string(),
        author: author.to_string(),
        genre: genre.to_string(),
        published_year,
        price,
        in_stock: true,
        pages,
        publisher: publisher.to_string(),
    }
}

/// Seed records, in insertion order.
pub fn books() -> Vec<Book> {
    vec![
        book("Becoming Supernatural", "Joe Dispenza", "Self-help / Spirituality", 2017, 18.99, 384, "Hay House Inc"),
        book("What Happened to You?", "Oprah Winfrey", "Psychology / Self-help", 2021, 20.00, 304, "Flatiron Books"),
        book(
            "How to Deal with Idiots (And Stop Being One Yourself)",
            "Maxime Rovere",
            "Self-help / Philosophy",
            2020,
            15.99,
            176,
            "Profile Books",
        ),
        book("The Subtle Art of Not Giving a F*ck", "Mark Manson", "Self-help", 2016, 14.99, 224, "Harper"),
        book("The Alchemist", "Paulo Coelho", "Fiction / Philosophy", 1988, 16.00, 208, "HarperOne"),
        book("Who Moved My Cheese?", "Spencer Johnson", "Business / Self-help", 1998, 11.95, 96, "Vermilion"),
        book("Untamed", "Glennon Doyle", "Memoir / Self-help", 2020, 17.99, 352, "The Dial Press"),
        book("If She Knew", "Blake Pierce", "Mystery / Thriller", 2019, 0.00, 250, "Blake Pierce"),
        book(
            "How to Love Someone Without Losing Your Mind",
            "Todd Baratz",
            "Relationships / Self-help",
            2024,
            19.99,
            240,
            "St. Martin's Essentials",
        ),
        book("The Art of War", "Sun Tzu", "Philosophy / Strategy", -500, 9.99, 273, "Various"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_dataset_shape() {
        let books = books();
        assert_eq!(books.len(), 10);

        let titles: HashSet<&str> = books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles.len(), 10);

        assert!(books.iter().any(|b| b.price == 0.0 && b.title == "If She Knew"));
        assert!(books.iter().any(|b| b.published_year == -500));
        assert!(books.iter().all(|b| b.in_stock));
    }
}
